//! SP-PIFO scheduling as a mixed-integer encoding.
//!
//! SP-PIFO approximates a PIFO queue with `Q` strict-priority FIFO queues
//! and one rank bound per queue. A packet of rank `r` is scanned from the
//! lowest-priority queue upwards and enqueued in the first queue whose
//! bound is `≤ r`, which then takes `r` as its bound (push-up). If even
//! queue 0 rejects it, it goes to queue 0 and every bound drops by
//! `b_0 − r` (push-down). Packets leave queue 0 first, FIFO within a queue.
//!
//! A priority inversion is a pair where the packet with the strictly
//! smaller rank leaves later. PIFO never inverts, so the inversion count
//! is the gap between SP-PIFO and the ideal scheduler.
//!
//! The encoding is deterministic given the ranks, so it is registered
//! feasibility-only; the ranks are the designated outer variables.

use super::ensure_same_solver;
use crate::error::{MetaOptError, Result};
use crate::inner::{EncodingOptions, InnerProblem};
use crate::polynomial::{Polynomial, Variable};
use crate::solver::{Solver, SolverId, VarType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Problem size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpPifoConfig {
    pub num_packets: usize,
    pub num_queues: usize,
    /// Ranks are integers in `[0, max_rank]`
    pub max_rank: u32,
}

impl Default for SpPifoConfig {
    fn default() -> Self {
        Self {
            num_packets: 4,
            num_queues: 2,
            max_rank: 3,
        }
    }
}

impl SpPifoConfig {
    pub fn new(num_packets: usize, num_queues: usize, max_rank: u32) -> Self {
        Self {
            num_packets,
            num_queues,
            max_rank,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_packets < 2 {
            return Err(MetaOptError::invalid_parameter("num_packets", "need at least 2 packets"));
        }
        if self.num_queues == 0 {
            return Err(MetaOptError::invalid_parameter("num_queues", "must be at least 1"));
        }
        if self.max_rank == 0 {
            return Err(MetaOptError::invalid_parameter("max_rank", "must be at least 1"));
        }
        Ok(())
    }
}

/// Outcome of a plain SP-PIFO run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpPifoTrace {
    /// Queue per packet, in arrival order
    pub queues: Vec<usize>,
    /// Packet indices in departure order
    pub dequeue_order: Vec<usize>,
    pub inversions: usize,
}

/// Run SP-PIFO on a burst of packets (all enqueued before any dequeue).
pub fn simulate(ranks: &[u32], num_queues: usize) -> SpPifoTrace {
    let num_queues = num_queues.max(1);
    let mut bounds = vec![0i64; num_queues];
    let mut queues = Vec::with_capacity(ranks.len());
    for &rank in ranks {
        let r = i64::from(rank);
        match (0..num_queues).rev().find(|&q| bounds[q] <= r) {
            Some(q) => {
                bounds[q] = r;
                queues.push(q);
            }
            None => {
                let cost = bounds[0] - r;
                for b in bounds.iter_mut() {
                    *b -= cost;
                }
                queues.push(0);
            }
        }
    }
    let mut dequeue_order: Vec<usize> = (0..ranks.len()).collect();
    dequeue_order.sort_by_key(|&i| (queues[i], i));
    let inversions = count_inversions(&dequeue_order, ranks);
    SpPifoTrace {
        queues,
        dequeue_order,
        inversions,
    }
}

/// Departure order of an ideal PIFO (rank order, FIFO among equal ranks)
pub fn pifo_order(ranks: &[u32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..ranks.len()).collect();
    order.sort_by_key(|&i| (ranks[i], i));
    order
}

/// Pairs where a strictly smaller rank departs later
pub fn count_inversions(order: &[usize], ranks: &[u32]) -> usize {
    let mut count = 0;
    for (pos, &first) in order.iter().enumerate() {
        for &later in &order[pos + 1..] {
            if ranks[later] < ranks[first] {
                count += 1;
            }
        }
    }
    count
}

/// Values read back from a solved encoding.
#[derive(Debug, Clone, Serialize)]
pub struct SpPifoSolution {
    pub ranks: Vec<u32>,
    pub queues: Vec<usize>,
    pub inversions: f64,
}

#[derive(Debug, Clone)]
struct SpPifoVars<V> {
    ranks: Vec<Polynomial<V>>,
    queue_index: Vec<Polynomial<V>>,
    inversions: Polynomial<V>,
}

/// SP-PIFO enqueue/dequeue logic as big-M constraints over rank expressions.
#[derive(Debug, Clone)]
pub struct SpPifoEncoder<V> {
    solver_id: SolverId,
    config: SpPifoConfig,
    vars: Option<SpPifoVars<V>>,
}

impl<V: Variable> SpPifoEncoder<V> {
    pub fn new<S>(solver: &S, config: SpPifoConfig) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        config.validate()?;
        Ok(Self {
            solver_id: solver.id(),
            config,
            vars: None,
        })
    }

    pub fn config(&self) -> &SpPifoConfig {
        &self.config
    }

    /// One integer rank variable per packet
    pub fn rank_variables<S>(&self, solver: &mut S) -> Result<Vec<V>>
    where
        S: Solver<Var = V>,
    {
        ensure_same_solver(self.solver_id, solver, "sp_pifo")?;
        (0..self.config.num_packets)
            .map(|i| solver.create_variable(&format!("rank_{}", i), VarType::Integer, 0.0, f64::from(self.config.max_rank)))
            .collect()
    }

    /// Register the scheduler over `ranks`; returns the inversion count.
    pub fn encode<S>(&mut self, solver: &mut S, ranks: &[Polynomial<V>]) -> Result<Polynomial<V>>
    where
        S: Solver<Var = V>,
    {
        ensure_same_solver(self.solver_id, solver, "sp_pifo")?;
        let n = self.config.num_packets;
        if ranks.len() != n {
            return Err(MetaOptError::invalid_parameter(
                "ranks",
                format!("expected {} rank expressions, got {}", n, ranks.len()),
            ));
        }
        let constants: HashSet<V> = ranks.iter().flat_map(|r| r.variables()).collect();
        let mut inner = InnerProblem::new(&EncodingOptions::feasibility_only(), constants, HashSet::new())?;

        let num_queues = self.config.num_queues;
        let max_rank = f64::from(self.config.max_rank);
        let m = 4.0 * (max_rank + 1.0);
        let one = Polynomial::constant(1.0);

        let mut bounds: Vec<Polynomial<V>> = vec![Polynomial::constant(0.0); num_queues];
        let mut queue_index = Vec::with_capacity(n);
        for (i, rank) in ranks.iter().enumerate() {
            // e_q = [b_q ≤ r], non-increasing in q
            let mut eligible: Vec<Polynomial<V>> = Vec::with_capacity(num_queues);
            for q in 0..num_queues {
                let e = Polynomial::var(solver.create_variable(&format!("spp_elig_{}_{}", i, q), VarType::Binary, 0.0, 1.0)?);
                inner.add_leq_zero(bounds[q].sub(rank).add(&e.scale(m)).add(&Polynomial::constant(-m)))?;
                inner.add_leq_zero(rank.sub(&bounds[q]).add(&one).sub(&e.scale(m)))?;
                if q > 0 {
                    inner.add_leq_zero(e.sub(&eligible[q - 1]))?;
                }
                eligible.push(e);
            }

            let push_down = one.sub(&eligible[0]);
            let placement: Vec<Polynomial<V>> = (0..num_queues)
                .map(|q| match q {
                    _ if num_queues == 1 => one.clone(),
                    0 => one.sub(&eligible[1]),
                    q if q == num_queues - 1 => eligible[q].clone(),
                    q => eligible[q].sub(&eligible[q + 1]),
                })
                .collect();
            let qi = placement
                .iter()
                .enumerate()
                .fold(Polynomial::new(), |acc, (q, a)| acc.add(&a.scale(q as f64)));
            queue_index.push(qi);

            if i + 1 == n {
                break;
            }
            let mut next = Vec::with_capacity(num_queues);
            for q in 0..num_queues {
                let pushed_up = if q == 0 {
                    placement[0].sub(&push_down)
                } else {
                    placement[q].clone()
                };
                let nb = Polynomial::var(solver.create_variable(
                    &format!("spp_bound_{}_{}", i + 1, q),
                    VarType::Continuous,
                    0.0,
                    max_rank,
                )?);
                let not_up = one.sub(&pushed_up).scale(m);
                let not_down = one.sub(&push_down).scale(m);
                let unchanged = push_down.add(&pushed_up).scale(m);
                let shifted = bounds[q].sub(&bounds[0]).add(rank);
                // push-up: b' = r
                inner.add_leq_zero(nb.sub(rank).sub(&not_up))?;
                inner.add_leq_zero(rank.sub(&nb).sub(&not_up))?;
                // push-down: b' = b − (b_0 − r)
                inner.add_leq_zero(nb.sub(&shifted).sub(&not_down))?;
                inner.add_leq_zero(shifted.sub(&nb).sub(&not_down))?;
                // otherwise: b' = b
                inner.add_leq_zero(nb.sub(&bounds[q]).sub(&unchanged))?;
                inner.add_leq_zero(bounds[q].sub(&nb).sub(&unchanged))?;
                next.push(nb);
            }
            bounds = next;
        }

        let queue_m = num_queues as f64;
        let rank_m = max_rank + 1.0;
        let mut inversions = Polynomial::new();
        for i in 0..n {
            for j in i + 1..n {
                let tag = format!("{}_{}", i, j);
                // j departs first iff Q_j < Q_i
                let j_first = less_than(solver, &mut inner, &queue_index[j], &queue_index[i], queue_m, &format!("spp_jfirst_{}", tag))?;
                let i_smaller = less_than(solver, &mut inner, &ranks[i], &ranks[j], rank_m, &format!("spp_ilt_{}", tag))?;
                let j_smaller = less_than(solver, &mut inner, &ranks[j], &ranks[i], rank_m, &format!("spp_jlt_{}", tag))?;
                let inv_i = and(solver, &mut inner, &j_first, &i_smaller, &format!("spp_inv_i_{}", tag))?;
                let inv_j = and(solver, &mut inner, &one.sub(&j_first), &j_smaller, &format!("spp_inv_j_{}", tag))?;
                inversions.extend(&inv_i);
                inversions.extend(&inv_j);
            }
        }

        let num_constraints = inner.num_constraints();
        inner.add_maximization_constraints(solver, &inversions, true)?;
        debug!(packets = n, queues = num_queues, num_constraints, "sp-pifo encoded");

        self.vars = Some(SpPifoVars {
            ranks: ranks.to_vec(),
            queue_index,
            inversions: inversions.clone(),
        });
        Ok(inversions)
    }

    pub fn solution<S>(&self, solver: &S, solution: &S::Solution) -> Result<SpPifoSolution>
    where
        S: Solver<Var = V>,
    {
        let vars = self.vars.as_ref().ok_or_else(|| super::not_encoded("sp_pifo"))?;
        let ranks = vars
            .ranks
            .iter()
            .map(|r| Ok(solver.evaluate(solution, r)?.round().max(0.0) as u32))
            .collect::<Result<Vec<_>>>()?;
        let queues = vars
            .queue_index
            .iter()
            .map(|q| Ok(solver.evaluate(solution, q)?.round().max(0.0) as usize))
            .collect::<Result<Vec<_>>>()?;
        Ok(SpPifoSolution {
            ranks,
            queues,
            inversions: solver.evaluate(solution, &vars.inversions)?,
        })
    }
}

/// `[a < b]` for integer-valued `a`, `b` with `|a − b| < big_m`.
fn less_than<S: Solver>(
    solver: &mut S,
    inner: &mut InnerProblem<S::Var>,
    a: &Polynomial<S::Var>,
    b: &Polynomial<S::Var>,
    big_m: f64,
    name: &str,
) -> Result<Polynomial<S::Var>> {
    if a.variables().is_empty() && b.variables().is_empty() {
        let holds = a.constant_value() < b.constant_value();
        return Ok(Polynomial::constant(if holds { 1.0 } else { 0.0 }));
    }
    let y = Polynomial::var(solver.create_variable(name, VarType::Binary, 0.0, 1.0)?);
    // y = 1 ⇒ a + 1 ≤ b
    inner.add_leq_zero(a.sub(b).add(&Polynomial::constant(1.0 - big_m)).add(&y.scale(big_m)))?;
    // y = 0 ⇒ b ≤ a
    inner.add_leq_zero(b.sub(a).sub(&y.scale(big_m)))?;
    Ok(y)
}

/// `x ∧ y` for 0/1-valued expressions
fn and<S: Solver>(
    solver: &mut S,
    inner: &mut InnerProblem<S::Var>,
    x: &Polynomial<S::Var>,
    y: &Polynomial<S::Var>,
    name: &str,
) -> Result<Polynomial<S::Var>> {
    if x.variables().is_empty() && y.variables().is_empty() {
        return Ok(Polynomial::constant(x.constant_value() * y.constant_value()));
    }
    let z = Polynomial::var(solver.create_variable(name, VarType::Continuous, 0.0, 1.0)?);
    inner.add_leq_zero(z.sub(x))?;
    inner.add_leq_zero(z.sub(y))?;
    inner.add_leq_zero(x.add(y).sub(&z).add(&Polynomial::constant(-1.0)))?;
    Ok(z)
}

/// Ranks that maximize SP-PIFO's priority inversions.
pub fn maximize_priority_inversions<S: Solver>(solver: &mut S, config: SpPifoConfig) -> Result<SpPifoSolution> {
    config.validate()?;
    solver.clean_all();
    let mut encoder = SpPifoEncoder::new(solver, config)?;
    let ranks: Vec<Polynomial<S::Var>> = encoder
        .rank_variables(solver)?
        .into_iter()
        .map(Polynomial::var)
        .collect();
    let inversions = encoder.encode(solver, &ranks)?;
    let solution = solver.maximize_objective(&inversions)?;
    let out = encoder.solution(solver, &solution)?;
    info!(ranks = ?out.ranks, inversions = out.inversions, "sp-pifo worst case");
    Ok(out)
}
