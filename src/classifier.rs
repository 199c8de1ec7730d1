//! Frame classification
//!
//! Resolves which of the detected hands is the target hand and which is the
//! pointing hand. Ambiguous frames are reported as a [`SkipReason`] and are
//! expected to be dropped by the caller without touching any trial state.

use serde::Serialize;
use std::fmt;

use crate::types::{DetectedHand, HandDetectionFrame, HandRole, Handedness};

/// Why a frame could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoHands,
    SingleHand,
    TooManyHands,
    SameHandedness,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SkipReason::NoHands => "no hands detected",
            SkipReason::SingleHand => "only one hand detected",
            SkipReason::TooManyHands => "more than two hands detected",
            SkipReason::SameHandedness => "both hands share the same handedness",
        };
        f.write_str(msg)
    }
}

/// A hand bound to its semantic role
#[derive(Debug, Clone, Copy)]
pub struct RoleHand<'a> {
    pub hand: &'a DetectedHand,
    pub role: HandRole,
    /// Handedness as seen by the user
    pub side: Handedness,
    /// Index of the hand in the detector output
    pub detector_index: usize,
}

impl<'a> RoleHand<'a> {
    pub fn color(&self) -> &'static str {
        self.role.color()
    }
}

/// Role assignment for one bimanual frame
#[derive(Debug, Clone, Copy)]
pub struct ClassifiedFrame<'a> {
    pub target: RoleHand<'a>,
    pub pointing: RoleHand<'a>,
}

impl<'a> ClassifiedFrame<'a> {
    /// Hands in detector order, for callers that process them sequentially
    pub fn in_detector_order(&self) -> [RoleHand<'a>; 2] {
        if self.target.detector_index < self.pointing.detector_index {
            [self.target, self.pointing]
        } else {
            [self.pointing, self.target]
        }
    }
}

/// Stateless per-frame role resolver
pub struct FrameClassifier;

impl FrameClassifier {
    /// Partition a frame into target and pointing hands.
    ///
    /// The detector's labels are mirror-inverted before being matched against
    /// `impaired_hand`.
    pub fn classify(
        frame: &HandDetectionFrame,
        impaired_hand: Handedness,
    ) -> Result<ClassifiedFrame<'_>, SkipReason> {
        let (first, second) = match frame.hands.as_slice() {
            [] => return Err(SkipReason::NoHands),
            [_] => return Err(SkipReason::SingleHand),
            [a, b] => (a, b),
            _ => return Err(SkipReason::TooManyHands),
        };

        if first.user_handedness() == second.user_handedness() {
            return Err(SkipReason::SameHandedness);
        }

        let a = Self::bind(first, 0, impaired_hand);
        let b = Self::bind(second, 1, impaired_hand);

        if a.role == HandRole::Target {
            Ok(ClassifiedFrame { target: a, pointing: b })
        } else {
            Ok(ClassifiedFrame { target: b, pointing: a })
        }
    }

    fn bind(hand: &DetectedHand, detector_index: usize, impaired_hand: Handedness) -> RoleHand<'_> {
        let side = hand.user_handedness();
        let role = if side == impaired_hand {
            HandRole::Target
        } else {
            HandRole::Pointing
        };
        RoleHand {
            hand,
            role,
            side,
            detector_index,
        }
    }
}
