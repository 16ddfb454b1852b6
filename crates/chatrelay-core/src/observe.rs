//! Page-observation model shared between the automation surface and the
//! extraction engine.

/// One observation tick from the watched output region: the rendered HTML of
/// every response entry plus the current completion-marker reading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageObservation {
    /// Inner HTML of each rendered response entry, in document order.
    pub entries: Vec<String>,
    pub marker: MarkerState,
}

/// Tri-state reading of the structural completion marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerState {
    /// Marker element or attribute is absent: the output region is not in a
    /// recognizable shape.
    Missing,
    InProgress,
    Done,
}

impl MarkerState {
    /// Classify a completion attribute value. Only `"true"` means done; any
    /// other present value means production is still in progress; absence is
    /// malformed.
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            None => Self::Missing,
            Some("true") => Self::Done,
            Some(_) => Self::InProgress,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Missing | Self::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_attribute_is_missing() {
        assert_eq!(MarkerState::from_attr(None), MarkerState::Missing);
    }

    #[test]
    fn true_is_done() {
        assert_eq!(MarkerState::from_attr(Some("true")), MarkerState::Done);
    }

    #[test]
    fn any_other_value_is_in_progress() {
        assert_eq!(MarkerState::from_attr(Some("false")), MarkerState::InProgress);
        assert_eq!(MarkerState::from_attr(Some("")), MarkerState::InProgress);
        assert_eq!(MarkerState::from_attr(Some("TRUE")), MarkerState::InProgress);
    }

    #[test]
    fn terminal_states() {
        assert!(MarkerState::Missing.is_terminal());
        assert!(MarkerState::Done.is_terminal());
        assert!(!MarkerState::InProgress.is_terminal());
    }
}
