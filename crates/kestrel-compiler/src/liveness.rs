//! Live slot analysis.
//!
//! Determines which slots must be captured in a snapshot at each resumption
//! point: a slot is live after instruction `i` if some path from `i` reads it
//! before overwriting it. Results of the suspending operation itself are not
//! captured, since they are delivered through the return buffer on re-entry.

use std::collections::{BTreeSet, HashMap};

use kestrel_ir::{Inst, LabelId, Proto, Slot};

#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<BTreeSet<Slot>>,
    live_out: Vec<BTreeSet<Slot>>,
}

impl Liveness {
    /// Solve the backward dataflow equations to a fixpoint.
    ///
    /// `labels` maps every label to the index of its `Label` instruction.
    pub fn analyze(proto: &Proto, labels: &HashMap<LabelId, usize>) -> Self {
        let body = &proto.body;
        let successors: Vec<Vec<usize>> = body
            .iter()
            .enumerate()
            .map(|(i, inst)| successors(i, inst, body.len(), labels))
            .collect();

        let mut live_in = vec![BTreeSet::new(); body.len()];
        let mut live_out = vec![BTreeSet::new(); body.len()];
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let mut changed = false;
            for i in (0..body.len()).rev() {
                let out: BTreeSet<Slot> = successors[i]
                    .iter()
                    .flat_map(|&s| live_in[s].iter().copied())
                    .collect();
                let defs = body[i].defs();
                let mut inn: BTreeSet<Slot> =
                    out.iter().filter(|s| !defs.contains(s)).copied().collect();
                inn.extend(body[i].uses());
                if out != live_out[i] || inn != live_in[i] {
                    live_out[i] = out;
                    live_in[i] = inn;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        tracing::trace!(function = %proto.name, rounds, "liveness converged");

        Self { live_in, live_out }
    }

    pub fn live_in(&self, index: usize) -> &BTreeSet<Slot> {
        &self.live_in[index]
    }

    pub fn live_out(&self, index: usize) -> &BTreeSet<Slot> {
        &self.live_out[index]
    }

    /// Slots to capture when suspending inside instruction `index`.
    pub fn live_across(&self, index: usize, inst: &Inst) -> Vec<Slot> {
        let defs = inst.defs();
        self.live_out[index]
            .iter()
            .filter(|s| !defs.contains(s))
            .copied()
            .collect()
    }
}

fn successors(
    index: usize,
    inst: &Inst,
    len: usize,
    labels: &HashMap<LabelId, usize>,
) -> Vec<usize> {
    let next = (index + 1 < len).then_some(index + 1);
    match inst {
        Inst::Return { .. } | Inst::TailCall { .. } => Vec::new(),
        Inst::Jump(target) => labels.get(target).copied().into_iter().collect(),
        Inst::JumpUnless { target, .. } => next
            .into_iter()
            .chain(labels.get(target).copied())
            .collect(),
        _ => next.into_iter().collect(),
    }
}
