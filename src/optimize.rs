//! Ancilla-Reuse Optimization (S4): greedy interval-graph colouring over
//! logical qubit live ranges, minimizing the width of the global register.

use std::cmp::Ordering;
use std::collections::HashMap;

use thiserror::Error;

use crate::graph::NodeId;
use crate::qubitmodel::QubitHandle;

/// A logical qubit's live-range end. `Infinite` models a qubit feeding a
/// `@leqo.output` — it must survive to program end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndRank {
    Finite(usize),
    Infinite,
}

/// Which branch of an `if`/`else` node a logical qubit belongs to, used only
/// to decide mutual exclusion for ancilla sharing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Branch {
    Then,
    Else,
}

/// Tags a logical qubit as belonging to one branch of a specific `if`/`else`
/// node. Two qubits tagged for the same node but different branches can
/// never be concurrently live and so may share a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutexTag {
    pub if_node: NodeId,
    pub branch: Branch,
}

fn mutually_exclusive(a: &Option<MutexTag>, b: &Option<MutexTag>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x.if_node == y.if_node && x.branch != y.branch,
        _ => false,
    }
}

/// Whether `slot` can currently host `iv` without interference — every qubit
/// presently occupying it must be mutually exclusive with `iv`.
fn slot_compatible(slots: &[Vec<usize>], intervals: &[Interval], slot: usize, iv: &Interval) -> bool {
    slots[slot]
        .iter()
        .all(|&occ| mutually_exclusive(&iv.mutex, &intervals[occ].mutex))
}

/// The lowest free-or-compatible slot for `iv`, growing `slots` by one if
/// none of the existing slots will do.
fn first_compatible_slot(slots: &mut Vec<Vec<usize>>, intervals: &[Interval], iv: &Interval) -> usize {
    match (0..slots.len()).find(|&s| slot_compatible(slots, intervals, s, iv)) {
        Some(s) => s,
        None => {
            slots.push(Vec::new());
            slots.len() - 1
        }
    }
}

/// One logical qubit's live interval, ready for colouring.
#[derive(Clone, Debug)]
pub struct Interval {
    pub qubit: QubitHandle,
    pub owner_node: NodeId,
    pub start: usize,
    pub end: EndRank,
    pub mutex: Option<MutexTag>,
    /// Ties this logical qubit to every other interval sharing the same tag:
    /// all members of a group must land on the *same* register slot (e.g. an
    /// `if`/`else` node's then/else output qubits, which an observer must be
    /// able to find at one fixed slot regardless of which branch ran).
    /// `None` for ordinary qubits. Unlike a caller-forced absolute index,
    /// the allocator is free to pick whichever slot is actually available —
    /// nothing requires the shared slot to be any particular number, only
    /// that every group member resolves to it (spec.md:72,99).
    pub equal_group: Option<u32>,
}

/// Failure to colour the interference graph under the requested constraints.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("node {node}: ancilla allocation is infeasible (overconstrained pinning)")]
    Infeasible { node: NodeId },
}

/// The result of S4: every logical qubit's assigned slot, and the resulting
/// global register width `N`.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub slot_of: HashMap<QubitHandle, u32>,
    pub width: u32,
}

/// Colour `intervals` into register slots. When `optimize` is false, every
/// logical qubit gets its own slot (the width-suboptimal baseline).
pub fn allocate(intervals: &[Interval], optimize: bool) -> Result<Allocation, AllocError> {
    if !optimize {
        let mut slot_of = HashMap::new();
        for (i, iv) in intervals.iter().enumerate() {
            slot_of.insert(iv.qubit, i as u32);
        }
        return Ok(Allocation {
            slot_of,
            width: intervals.len() as u32,
        });
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Kind {
        End,
        Start,
    }
    struct Event {
        rank: usize,
        kind: Kind,
        idx: usize,
    }

    let lifetime = |idx: usize| -> usize {
        match intervals[idx].end {
            EndRank::Infinite => usize::MAX,
            EndRank::Finite(e) => e.saturating_sub(intervals[idx].start),
        }
    };

    let mut events = Vec::with_capacity(intervals.len() * 2);
    for (i, iv) in intervals.iter().enumerate() {
        events.push(Event {
            rank: iv.start,
            kind: Kind::Start,
            idx: i,
        });
        if let EndRank::Finite(r) = iv.end {
            events.push(Event {
                rank: r,
                kind: Kind::End,
                idx: i,
            });
        }
    }

    // Pinned (grouped) Start events go first among same-rank Starts — per
    // spec.md:91, "Any pinned qubit is allocated first; the greedy fills
    // around it" — then ties break by longest remaining lifetime.
    events.sort_by(|a, b| {
        a.rank.cmp(&b.rank).then_with(|| match (a.kind, b.kind) {
            (Kind::End, Kind::Start) => Ordering::Less,
            (Kind::Start, Kind::End) => Ordering::Greater,
            (Kind::Start, Kind::Start) => {
                let a_grouped = intervals[a.idx].equal_group.is_some();
                let b_grouped = intervals[b.idx].equal_group.is_some();
                match (a_grouped, b_grouped) {
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    _ => lifetime(b.idx).cmp(&lifetime(a.idx)),
                }
            }
            (Kind::End, Kind::End) => Ordering::Equal,
        })
    });

    let mut slots: Vec<Vec<usize>> = Vec::new();
    let mut slot_of: HashMap<QubitHandle, u32> = HashMap::new();
    let mut slot_of_idx: HashMap<usize, u32> = HashMap::new();
    let mut group_slot: HashMap<u32, usize> = HashMap::new();

    for ev in &events {
        match ev.kind {
            Kind::End => {
                if let Some(&s) = slot_of_idx.get(&ev.idx) {
                    slots[s as usize].retain(|&occ| occ != ev.idx);
                }
            }
            Kind::Start => {
                let iv = &intervals[ev.idx];

                let chosen = if let Some(group) = iv.equal_group {
                    if let Some(&s) = group_slot.get(&group) {
                        if !slot_compatible(&slots, intervals, s, iv) {
                            return Err(AllocError::Infeasible {
                                node: iv.owner_node.clone(),
                            });
                        }
                        s
                    } else {
                        let s = first_compatible_slot(&mut slots, intervals, iv);
                        group_slot.insert(group, s);
                        s
                    }
                } else {
                    first_compatible_slot(&mut slots, intervals, iv)
                };

                slots[chosen].push(ev.idx);
                slot_of.insert(iv.qubit, chosen as u32);
                slot_of_idx.insert(ev.idx, chosen as u32);
            }
        }
    }

    Ok(Allocation {
        slot_of,
        width: slots.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(q: u32, start: usize, end: EndRank) -> Interval {
        Interval {
            qubit: QubitHandle(q),
            owner_node: NodeId(format!("n{q}")),
            start,
            end,
            mutex: None,
            equal_group: None,
        }
    }

    #[test]
    fn disjoint_lifetimes_reuse_one_slot() {
        let ivs = vec![iv(0, 0, EndRank::Finite(1)), iv(1, 1, EndRank::Finite(2))];
        let alloc = allocate(&ivs, true).unwrap();
        assert_eq!(alloc.width, 1);
        assert_eq!(alloc.slot_of[&QubitHandle(0)], alloc.slot_of[&QubitHandle(1)]);
    }

    #[test]
    fn overlapping_lifetimes_get_distinct_slots() {
        let ivs = vec![iv(0, 0, EndRank::Finite(3)), iv(1, 1, EndRank::Finite(2))];
        let alloc = allocate(&ivs, true).unwrap();
        assert_eq!(alloc.width, 2);
    }

    #[test]
    fn mutually_exclusive_branches_share_a_slot_despite_overlap() {
        let mut a = iv(0, 0, EndRank::Finite(5));
        a.mutex = Some(MutexTag {
            if_node: NodeId("ifnode".into()),
            branch: Branch::Then,
        });
        let mut b = iv(1, 0, EndRank::Finite(5));
        b.mutex = Some(MutexTag {
            if_node: NodeId("ifnode".into()),
            branch: Branch::Else,
        });
        let alloc = allocate(&[a, b], true).unwrap();
        assert_eq!(alloc.width, 1);
    }

    #[test]
    fn optimize_disabled_gives_every_qubit_a_unique_slot() {
        let ivs = vec![iv(0, 0, EndRank::Finite(1)), iv(1, 1, EndRank::Finite(2))];
        let alloc = allocate(&ivs, false).unwrap();
        assert_eq!(alloc.width, 2);
        assert_ne!(alloc.slot_of[&QubitHandle(0)], alloc.slot_of[&QubitHandle(1)]);
    }

    #[test]
    fn output_bound_qubit_gets_infinite_lifetime_and_holds_its_slot() {
        let ivs = vec![
            iv(0, 0, EndRank::Infinite),
            iv(1, 1, EndRank::Finite(2)),
        ];
        let alloc = allocate(&ivs, true).unwrap();
        assert_eq!(alloc.width, 2);
    }

    #[test]
    fn equal_group_members_share_whatever_slot_is_free_not_a_forced_index() {
        // An earlier @leqo.output-bound qubit has infinite lifetime and so
        // permanently holds slot 0 (spec.md:95). An if/else node's then/else
        // outputs only need to land on the *same* slot as each other, never
        // a specific globally-numbered one — this must not spuriously
        // conflict with slot 0 already being taken forever.
        let held = iv(0, 0, EndRank::Infinite);
        let mut then_out = iv(1, 1, EndRank::Finite(2));
        then_out.equal_group = Some(7);
        let mut else_out = iv(2, 1, EndRank::Finite(2));
        else_out.equal_group = Some(7);

        let alloc = allocate(&[held, then_out, else_out], true).unwrap();
        assert_eq!(alloc.slot_of[&QubitHandle(1)], alloc.slot_of[&QubitHandle(2)]);
        assert_ne!(alloc.slot_of[&QubitHandle(1)], alloc.slot_of[&QubitHandle(0)]);
        assert_eq!(alloc.width, 2);
    }

    #[test]
    fn grouped_interval_is_allocated_before_a_longer_lived_unpinned_one_at_the_same_rank() {
        let mut grouped = iv(0, 0, EndRank::Finite(2));
        grouped.equal_group = Some(1);
        let unpinned = iv(1, 0, EndRank::Finite(100));

        let alloc = allocate(&[grouped, unpinned], true).unwrap();
        assert_eq!(alloc.slot_of[&QubitHandle(0)], 0);
        assert_eq!(alloc.slot_of[&QubitHandle(1)], 1);
    }
}
