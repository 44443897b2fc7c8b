//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PENDING ──┬──► CONFIRMED
///           ├──► QUEUED ──┬──► COMPLETED
///           │             └──► FAILED
///           └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, synchronous fulfillment in flight.
    #[default]
    Pending,

    /// Fulfilled within the deadline (terminal state).
    Confirmed,

    /// Deadline exceeded, fulfillment deferred to the work queue.
    Queued,

    /// Deferred fulfillment applied (terminal state).
    Completed,

    /// Fulfillment could not be applied or scheduled (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Completed | OrderStatus::Failed
        )
    }

    /// Returns the states from which `self` may be entered.
    pub fn predecessors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[],
            OrderStatus::Confirmed | OrderStatus::Queued => &[OrderStatus::Pending],
            OrderStatus::Completed => &[OrderStatus::Queued],
            OrderStatus::Failed => &[OrderStatus::Pending, OrderStatus::Queued],
        }
    }

    /// Returns true if an order in this state may move to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        next.predecessors().contains(self)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Queued => "QUEUED",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "QUEUED" => Ok(OrderStatus::Queued),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Queued,
        OrderStatus::Completed,
        OrderStatus::Failed,
    ];

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_pending_transitions() {
        let from = OrderStatus::Pending;
        assert!(from.can_transition_to(OrderStatus::Confirmed));
        assert!(from.can_transition_to(OrderStatus::Queued));
        assert!(from.can_transition_to(OrderStatus::Failed));
        assert!(!from.can_transition_to(OrderStatus::Completed));
        assert!(!from.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_queued_transitions() {
        let from = OrderStatus::Queued;
        assert!(from.can_transition_to(OrderStatus::Completed));
        assert!(from.can_transition_to(OrderStatus::Failed));
        assert!(!from.can_transition_to(OrderStatus::Confirmed));
        assert!(!from.can_transition_to(OrderStatus::Queued));
    }

    #[test]
    fn test_terminal_states_never_move() {
        for from in ALL.into_iter().filter(OrderStatus::is_terminal) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} allowed");
            }
        }
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Queued.is_terminal());
    }

    #[test]
    fn test_display_and_parse() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("queued".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::Queued).unwrap();
        assert_eq!(json, "\"QUEUED\"");
        let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderStatus::Queued);
    }
}
