//! Deterministic host election: given the NAT-quality of every participant,
//! pick the one best placed to host. Both sides of a two-party negotiation
//! run this same pure function and arrive at the same winner without
//! further exchange — it lives in `dss-codec` rather than `dss-service` so
//! the client state machine can run it without pulling in the server's
//! storage/crypto dependency stack.

use crate::message::NatQuality;

/// One participant's election input.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub participant_id: [u8; 16],
    pub quality: NatQuality,
}

/// Lower is better. NAT tier is reported by the peer's own probe
/// (`nat_type_tier`, 0..5) and is used as-is — `has_public_ip` is informative
/// but doesn't override it, since two candidates behind different NAT types
/// can both lack a public IP yet differ in reachability. A participant with
/// `detection_complete=false` is penalized into the worst tier so an
/// incomplete probe never wins over a completed one.
fn tier(quality: &NatQuality) -> u8 {
    if !quality.detection_complete {
        return 5;
    }

    quality.nat_type_tier.min(4)
}

/// Picks the best host from `candidates`. Returns `None` only when
/// `candidates` is empty — the caller (`§4.10`) treats that as "keep the
/// current host unchanged".
///
/// # Test
///
/// S5 (`spec.md §8`): given `P_1=(tier=1, up=1_000)`, `P_2=(tier=0, up=500)`,
/// `P_3=(tier=0, up=800)`, the winner is `P_3` — lowest tier, then highest
/// upload among the tier-0 tie.
///
/// ```
/// use dss_codec::election::{elect, Candidate};
/// use dss_codec::message::NatQuality;
///
/// let quality = |tier, public, up, rtt| NatQuality {
///     has_public_ip: public,
///     nat_type_tier: tier,
///     upload_kbps: up,
///     rtt_ms: rtt,
///     detection_complete: true,
/// };
///
/// let candidates = vec![
///     Candidate { participant_id: [1u8; 16], quality: quality(1, false, 1_000, 50) },
///     Candidate { participant_id: [2u8; 16], quality: quality(0, false, 500, 50) },
///     Candidate { participant_id: [3u8; 16], quality: quality(0, true, 800, 50) },
/// ];
///
/// let winner = elect(&candidates).unwrap();
/// assert_eq!(winner.participant_id, [3u8; 16]);
/// ```
pub fn elect(candidates: &[Candidate]) -> Option<Candidate> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| {
            tier(&a.quality)
                .cmp(&tier(&b.quality))
                .then(b.quality.upload_kbps.cmp(&a.quality.upload_kbps))
                .then(a.quality.rtt_ms.cmp(&b.quality.rtt_ms))
                .then(a.participant_id.cmp(&b.participant_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(tier: u8, public: bool, up: u32, rtt: u32) -> NatQuality {
        NatQuality {
            has_public_ip: public,
            nat_type_tier: tier,
            upload_kbps: up,
            rtt_ms: rtt,
            detection_complete: true,
        }
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(elect(&[]).is_none());
    }

    #[test]
    fn deterministic_across_runs() {
        let candidates = vec![
            Candidate { participant_id: [2u8; 16], quality: quality(1, false, 100, 10) },
            Candidate { participant_id: [1u8; 16], quality: quality(1, false, 100, 10) },
        ];

        // Tie on tier/upload/rtt: lowest participant_id wins.
        let a = elect(&candidates).unwrap();
        let b = elect(&candidates).unwrap();
        assert_eq!(a.participant_id, b.participant_id);
        assert_eq!(a.participant_id, [1u8; 16]);
    }

    #[test]
    fn incomplete_detection_is_worst_tier() {
        let candidates = vec![
            Candidate {
                participant_id: [1u8; 16],
                quality: NatQuality {
                    has_public_ip: true,
                    nat_type_tier: 0,
                    upload_kbps: 10,
                    rtt_ms: 999,
                    detection_complete: false,
                },
            },
            Candidate { participant_id: [2u8; 16], quality: quality(3, false, 1, 999) },
        ];

        assert_eq!(elect(&candidates).unwrap().participant_id, [2u8; 16]);
    }
}
