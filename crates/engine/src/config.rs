use serde::Deserialize;

use crate::error::EngineError;

/// Hard ceiling on how many entries one undo call may revert.
pub const MAX_UNDO_COUNT: usize = 10;

/// What to do with an undo request above `max_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum OversizedCount {
    Reject,
    Clamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UndoPolicy {
    pub max_count: usize,
    pub oversized: OversizedCount,
}

impl Default for UndoPolicy {
    fn default() -> Self {
        Self {
            max_count: MAX_UNDO_COUNT,
            oversized: OversizedCount::Reject,
        }
    }
}

impl UndoPolicy {
    /// Parse a policy from RON, e.g. `(max_count: 5, oversized: Clamp)`.
    /// Missing keys take their defaults.
    pub fn from_ron(text: &str) -> Result<Self, EngineError> {
        let policy: Self =
            ron::from_str(text).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_count == 0 || self.max_count > MAX_UNDO_COUNT {
            return Err(EngineError::InvalidConfig(format!(
                "max_count must be within 1..={MAX_UNDO_COUNT}, got {}",
                self.max_count
            )));
        }
        Ok(())
    }

    /// The number of entries an undo call for `requested` will actually try.
    /// Never more than `MAX_UNDO_COUNT`, whatever `max_count` says.
    pub fn resolve_count(&self, requested: usize) -> Result<usize, EngineError> {
        let max = self.max_count.min(MAX_UNDO_COUNT);
        let invalid = EngineError::InvalidCount { requested, max };
        match requested {
            0 => Err(invalid),
            n if n <= max => Ok(n),
            _ => match self.oversized {
                OversizedCount::Reject => Err(invalid),
                OversizedCount::Clamp => Ok(max),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rejects_out_of_range() {
        let policy = UndoPolicy::default();
        assert!(matches!(
            policy.resolve_count(0),
            Err(EngineError::InvalidCount { requested: 0, max: 10 })
        ));
        assert_eq!(policy.resolve_count(1).unwrap(), 1);
        assert_eq!(policy.resolve_count(10).unwrap(), 10);
        assert!(matches!(
            policy.resolve_count(1000),
            Err(EngineError::InvalidCount { requested: 1000, .. })
        ));
    }

    #[test]
    fn clamp_policy_caps_but_still_rejects_zero() {
        let policy = UndoPolicy::from_ron("(max_count: 5, oversized: Clamp)").unwrap();
        assert_eq!(policy.resolve_count(1000).unwrap(), 5);
        assert_eq!(policy.resolve_count(3).unwrap(), 3);
        assert!(policy.resolve_count(0).is_err());
    }

    #[test]
    fn missing_keys_use_defaults() {
        let policy = UndoPolicy::from_ron("(oversized: Clamp)").unwrap();
        assert_eq!(policy.max_count, MAX_UNDO_COUNT);
        assert_eq!(policy.oversized, OversizedCount::Clamp);
    }

    #[test]
    fn rejects_unbounded_max() {
        assert!(matches!(
            UndoPolicy::from_ron("(max_count: 1000)"),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(UndoPolicy::from_ron("(max_count: 0)").is_err());
        assert!(UndoPolicy::from_ron("not ron at all").is_err());
    }

    #[test]
    fn hand_built_policy_never_exceeds_the_ceiling() {
        let policy = UndoPolicy {
            max_count: 1000,
            oversized: OversizedCount::Reject,
        };
        assert!(policy.validate().is_err());
        assert_eq!(policy.resolve_count(10).unwrap(), 10);
        assert!(matches!(
            policy.resolve_count(50),
            Err(EngineError::InvalidCount { requested: 50, max: 10 })
        ));
        let clamped = UndoPolicy {
            oversized: OversizedCount::Clamp,
            ..policy
        };
        assert_eq!(clamped.resolve_count(50).unwrap(), 10);
    }
}
