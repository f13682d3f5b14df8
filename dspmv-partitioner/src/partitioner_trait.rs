//! Partitioning strategies, selected once at construction time and swapped
//! freely behind a single capability trait, per `spec.md` §4.1 / §9.
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context};
use dspmv_core::error::{ResultExt, SystemError, TypedResult};

use crate::hypergraph::Hypergraph;

/// Assigns every cell of a hypergraph to one of `k` parts.
///
/// Implementations are free to ignore weights or connectivity in favor of
/// any heuristic, as long as the returned vector has `hg.num_cells` entries
/// each in `0..k`.
pub trait HypergraphPartitioner: Send + Sync {
    fn partition(&self, hg: &Hypergraph, k: usize) -> TypedResult<Vec<usize>>;
}

/// Shells out to an external partitioner executable (e.g. a PaToH-backed
/// binary), trading process-spawn overhead for a partitioner this crate does
/// not have to implement itself.
///
/// The contract on stdin/stdout is line-oriented: the number of cells and
/// nets, the weight of each cell, then for each net its pin count followed
/// by its pins, one line each; the child is expected to print `k` followed
/// by one assignment integer per cell, one per line, to stdout.
pub struct ExternalPartitioner {
    executable: std::path::PathBuf,
}

impl ExternalPartitioner {
    pub fn new(executable: impl Into<std::path::PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl HypergraphPartitioner for ExternalPartitioner {
    fn partition(&self, hg: &Hypergraph, k: usize) -> TypedResult<Vec<usize>> {
        let mut child = Command::new(&self.executable)
            .arg(k.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning partitioner {}", self.executable.display()))
            .typ(SystemError::Config)?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| anyhow!("partitioner child has no stdin"))
                .typ(SystemError::Config)?;
            writeln!(stdin, "{} {}", hg.num_cells, hg.num_nets).typ(SystemError::Io)?;
            writeln!(
                stdin,
                "{}",
                hg.cell_weight
                    .iter()
                    .map(|w| w.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            )
            .typ(SystemError::Io)?;
            for pins in &hg.net_pins {
                writeln!(
                    stdin,
                    "{} {}",
                    pins.len(),
                    pins.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(" ")
                )
                .typ(SystemError::Io)?;
            }
        }

        let output = child
            .wait_with_output()
            .with_context(|| "waiting for partitioner child")
            .typ(SystemError::Communication)?;
        if !output.status.success() {
            return Err(anyhow!(
                "partitioner exited with status {:?}",
                output.status.code()
            ))
            .typ(SystemError::Communication);
        }

        let mut lines = BufReader::new(output.stdout.as_slice()).lines();
        let mut assign = Vec::with_capacity(hg.num_cells);
        for _ in 0..hg.num_cells {
            let line = lines
                .next()
                .ok_or_else(|| anyhow!("partitioner produced too few assignment lines"))
                .typ(SystemError::Communication)?
                .typ(SystemError::Io)?;
            let part: usize = line
                .trim()
                .parse()
                .map_err(|_| anyhow!("malformed assignment line {line:?}"))
                .typ(SystemError::Communication)?;
            if part >= k {
                return Err(anyhow!("partitioner assigned out-of-range part {part}"))
                    .typ(SystemError::Invariant);
            }
            assign.push(part);
        }
        Ok(assign)
    }
}

/// A deterministic, dependency-free default: balance-respecting greedy
/// assignment followed by a bounded local-search pass that only moves a cell
/// when doing so strictly lowers total net connectivity without breaking the
/// balance bound.
///
/// This never beats a real hypergraph partitioner on connectivity, but it
/// needs no external binary and always terminates, so it is the fallback
/// `HypergraphPartitioner` used when no `ExternalPartitioner` is configured.
pub struct GreedyConnectivityPartitioner {
    /// Maximum number of refinement sweeps over all cells.
    pub max_sweeps: usize,
}

impl Default for GreedyConnectivityPartitioner {
    fn default() -> Self {
        Self { max_sweeps: 8 }
    }
}

impl HypergraphPartitioner for GreedyConnectivityPartitioner {
    fn partition(&self, hg: &Hypergraph, k: usize) -> TypedResult<Vec<usize>> {
        if k == 0 {
            return Err(anyhow!("cannot partition into 0 parts")).typ(SystemError::Invariant);
        }
        if hg.num_cells == 0 {
            return Ok(Vec::new());
        }

        // A net-to-cells adjacency is already `hg.net_pins`; build the
        // reverse, cell-to-nets, once so refinement can look up a cell's
        // nets without rescanning every net.
        let mut cell_nets: Vec<Vec<usize>> = vec![Vec::new(); hg.num_cells];
        for (net, pins) in hg.net_pins.iter().enumerate() {
            for &cell in pins {
                cell_nets[cell].push(net);
            }
        }

        let total_weight: usize = hg.cell_weight.iter().sum();
        let target = (total_weight as f64 / k as f64).ceil() as usize;

        // Initial assignment: walk cells in index order, filling each part up
        // to `target` weight before moving to the next. This keeps locally
        // adjacent rows (which tend to share nets, given typical banded or
        // block sparsity patterns) on the same part without needing the nets
        // at all for this first pass.
        let mut assign = vec![0usize; hg.num_cells];
        let mut part_weight = vec![0usize; k];
        let mut part = 0;
        for cell in 0..hg.num_cells {
            while part + 1 < k && part_weight[part] >= target.max(1) {
                part += 1;
            }
            assign[cell] = part;
            part_weight[part] += hg.cell_weight[cell];
        }

        // Bounded local search: for each cell, try moving it to the part that
        // most of its net-neighbors already sit on, accepting the move only
        // if it does not push the destination part over `target` by more
        // than one cell's weight (keeping balance close to even) and it does
        // not strictly worsen connectivity.
        for _ in 0..self.max_sweeps {
            let mut moved = false;
            for cell in 0..hg.num_cells {
                let current = assign[cell];
                let mut neighbor_votes = vec![0usize; k];
                for &net in &cell_nets[cell] {
                    for &other in &hg.net_pins[net] {
                        if other != cell {
                            neighbor_votes[assign[other]] += 1;
                        }
                    }
                }
                let best = neighbor_votes
                    .iter()
                    .enumerate()
                    .max_by_key(|&(_, v)| *v)
                    .map(|(p, _)| p)
                    .unwrap_or(current);
                if best == current || neighbor_votes[best] == 0 {
                    continue;
                }
                let w = hg.cell_weight[cell];
                let slack = target.max(1) + w;
                if part_weight[best] + w > slack {
                    continue;
                }
                let before = local_connectivity(hg, &cell_nets[cell], &assign);
                assign[cell] = best;
                let after = local_connectivity(hg, &cell_nets[cell], &assign);
                if after < before {
                    part_weight[current] -= w;
                    part_weight[best] += w;
                    moved = true;
                } else {
                    assign[cell] = current;
                }
            }
            if !moved {
                break;
            }
        }

        Ok(assign)
    }
}

/// Connectivity contribution of just the nets touching one cell, used to
/// judge a single candidate move without recomputing the whole hypergraph's
/// connectivity on every trial.
fn local_connectivity(hg: &Hypergraph, nets: &[usize], assign: &[usize]) -> usize {
    let mut total = 0;
    let mut seen = Vec::new();
    for &net in nets {
        seen.clear();
        for &cell in &hg.net_pins[net] {
            let p = assign[cell];
            if !seen.contains(&p) {
                seen.push(p);
            }
        }
        if !seen.is_empty() {
            total += seen.len() - 1;
        }
    }
    total
}

#[cfg(test)]
mod test {
    use super::*;
    use dspmv_core::matrix::{Element, GlobalMatrix};

    fn banded(n: usize) -> GlobalMatrix {
        let mut elements = Vec::new();
        for i in 0..n {
            elements.push(Element { row: i, col: i, val: 2.0 });
            if i + 1 < n {
                elements.push(Element { row: i, col: i + 1, val: -1.0 });
                elements.push(Element { row: i + 1, col: i, val: -1.0 });
            }
        }
        GlobalMatrix { n, elements }
    }

    #[test]
    fn greedy_respects_part_count_and_balance() {
        let matrix = banded(12);
        let hg = Hypergraph::from_matrix(&matrix);
        let partitioner = GreedyConnectivityPartitioner::default();
        let assign = partitioner.partition(&hg, 3).unwrap();
        assert_eq!(assign.len(), 12);
        assert!(assign.iter().all(|&p| p < 3));
        let mut weight = vec![0usize; 3];
        for (cell, &p) in assign.iter().enumerate() {
            weight[p] += hg.cell_weight[cell];
        }
        let total: usize = weight.iter().sum();
        for w in weight {
            assert!((w as f64) <= (total as f64 / 3.0) * 2.0);
        }
    }

    #[test]
    fn greedy_never_beats_all_in_one_part_by_violating_bounds() {
        let matrix = banded(6);
        let hg = Hypergraph::from_matrix(&matrix);
        let partitioner = GreedyConnectivityPartitioner::default();
        let assign = partitioner.partition(&hg, 1).unwrap();
        assert!(assign.iter().all(|&p| p == 0));
    }

    #[test]
    fn rejects_zero_parts() {
        let matrix = banded(3);
        let hg = Hypergraph::from_matrix(&matrix);
        let partitioner = GreedyConnectivityPartitioner::default();
        let err = partitioner.partition(&hg, 0).unwrap_err();
        assert_eq!(err.kind(), SystemError::Invariant);
    }
}
