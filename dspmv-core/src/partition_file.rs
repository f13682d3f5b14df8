//! Reader and writer for the partition file format of `spec.md` §6.
//!
//! ```text
//! #Matrix
//! N N M P <basename>
//! #Partitioning
//! a_0 a_1 … a_{N-1}
//! #LocalToGlobalTable
//! C_p
//! g_0 g_1 … g_{C_p-1}
//! #SubMatrix
//! R_p numInternal numExternal
//! <row col val>   (numInternal lines, global indices, row-sorted)
//! <row col val>   (numExternal lines, global indices, row-sorted)
//! #Communication
//! #Send
//! numSendNeighbors totalSend
//! <dst len i_0 … i_{len-1}>
//! #Recv
//! numRecvNeighbors totalRecv
//! <src len i_0 … i_{len-1}>
//! ```
use std::fmt::Write as _;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::error::{ResultExt, SystemError, TypedResult};

/// A fully parsed (or about-to-be-written) partition file, global-index form.
/// The planner builds one of these per process; the loader consumes it and
/// translates global indices into a [`crate::sparse::SparseMatrix`].
#[derive(Debug, Clone)]
pub struct PartitionFile {
    pub n: usize,
    pub m: usize,
    pub p: usize,
    pub rank: usize,
    pub basename: String,
    /// `assign[i]` is the owning rank of global row `i`.
    pub assign: Vec<usize>,
    /// Global column per local index, internal block first.
    pub local2global: Vec<usize>,
    pub local_rows: usize,
    /// Global `(row, col, val)`, row-sorted, columns owned by this rank.
    pub internal: Vec<(usize, usize, f64)>,
    /// Global `(row, col, val)`, row-sorted, columns not owned by this rank.
    pub external: Vec<(usize, usize, f64)>,
    /// `(destination rank, local indices into the internal block)`.
    pub send: Vec<(usize, Vec<usize>)>,
    /// `(source rank, local indices into the external block)`.
    pub recv: Vec<(usize, Vec<usize>)>,
}

impl PartitionFile {
    pub fn file_name(basename: &str, p: usize, rank: usize) -> String {
        format!("{basename}-{p}-{rank}.part")
    }

    pub fn write(&self, path: impl AsRef<Path>) -> TypedResult<()> {
        let mut out = String::new();

        writeln!(out, "#Matrix").unwrap();
        writeln!(out, "{} {} {} {} {}", self.n, self.n, self.m, self.p, self.basename).unwrap();

        writeln!(out, "#Partitioning").unwrap();
        writeln!(out, "{}", join(&self.assign)).unwrap();

        writeln!(out, "#LocalToGlobalTable").unwrap();
        writeln!(out, "{}", self.local2global.len()).unwrap();
        writeln!(out, "{}", join(&self.local2global)).unwrap();

        writeln!(out, "#SubMatrix").unwrap();
        writeln!(
            out,
            "{} {} {}",
            self.local_rows,
            self.internal.len(),
            self.external.len()
        )
        .unwrap();
        for &(r, c, v) in &self.internal {
            writeln!(out, "{r} {c} {v:?}").unwrap();
        }
        for &(r, c, v) in &self.external {
            writeln!(out, "{r} {c} {v:?}").unwrap();
        }

        writeln!(out, "#Communication").unwrap();
        writeln!(out, "#Send").unwrap();
        writeln!(
            out,
            "{} {}",
            self.send.len(),
            self.send.iter().map(|(_, idx)| idx.len()).sum::<usize>()
        )
        .unwrap();
        for (dst, idx) in &self.send {
            writeln!(out, "{} {} {}", dst, idx.len(), join(idx)).unwrap();
        }
        writeln!(out, "#Recv").unwrap();
        writeln!(
            out,
            "{} {}",
            self.recv.len(),
            self.recv.iter().map(|(_, idx)| idx.len()).sum::<usize>()
        )
        .unwrap();
        for (src, idx) in &self.recv {
            writeln!(out, "{} {} {}", src, idx.len(), join(idx)).unwrap();
        }

        let mut f = std::fs::File::create(path.as_ref())
            .with_context(|| format!("creating {}", path.as_ref().display()))
            .typ(SystemError::Io)?;
        f.write_all(out.as_bytes())
            .with_context(|| format!("writing {}", path.as_ref().display()))
            .typ(SystemError::Io)
    }

    /// Parses the file at `path`. `rank` is the rank this file is expected to
    /// belong to (the caller already knows it, from the `-<P>-<rank>.part`
    /// suffix it chose to open) rather than something inferred from content,
    /// since a process owning zero rows has no internal-block entry to infer
    /// it from.
    pub fn read(path: impl AsRef<Path>, rank: usize) -> TypedResult<Self> {
        let f = std::fs::File::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))
            .typ(SystemError::Io)?;
        let mut lines = BufReader::new(f).lines();
        let mut next = move || -> TypedResult<String> {
            lines
                .next()
                .ok_or_else(|| anyhow!("unexpected end of partition file"))
                .typ(SystemError::PartitionFormat)?
                .with_context(|| "reading partition file line")
                .typ(SystemError::Io)
        };

        expect_header(&mut next, "#Matrix")?;
        let header = next()?;
        let mut fields = header.split_whitespace();
        let n: usize = field(&mut fields, "N")?;
        let n_cols: usize = field(&mut fields, "N (cols)")?;
        let m: usize = field(&mut fields, "M")?;
        let p: usize = field(&mut fields, "P")?;
        let basename = fields
            .next()
            .ok_or_else(|| anyhow!("missing basename field"))
            .typ(SystemError::PartitionFormat)?
            .to_string();
        if n != n_cols {
            return Err(anyhow!("declared matrix is not square: {n} x {n_cols}"))
                .typ(SystemError::Invariant);
        }

        expect_header(&mut next, "#Partitioning")?;
        let assign = parse_list(&next()?)?;
        if assign.len() != n {
            return Err(anyhow!(
                "partitioning row has {} entries, expected {n}",
                assign.len()
            ))
            .typ(SystemError::Invariant);
        }

        expect_header(&mut next, "#LocalToGlobalTable")?;
        let c_p: usize = next()?.trim().parse().typ(SystemError::PartitionFormat)?;
        let local2global = parse_list(&next()?)?;
        if local2global.len() != c_p {
            return Err(anyhow!(
                "local-to-global table declared {c_p} entries, found {}",
                local2global.len()
            ))
            .typ(SystemError::Invariant);
        }

        expect_header(&mut next, "#SubMatrix")?;
        let sub_header = next()?;
        let mut fields = sub_header.split_whitespace();
        let local_rows: usize = field(&mut fields, "R_p")?;
        let num_internal: usize = field(&mut fields, "numInternal")?;
        let num_external: usize = field(&mut fields, "numExternal")?;
        let mut internal = Vec::with_capacity(num_internal);
        for _ in 0..num_internal {
            internal.push(parse_triple(&next()?)?);
        }
        let mut external = Vec::with_capacity(num_external);
        for _ in 0..num_external {
            external.push(parse_triple(&next()?)?);
        }

        expect_header(&mut next, "#Communication")?;
        expect_header(&mut next, "#Send")?;
        let send_header = next()?;
        let mut fields = send_header.split_whitespace();
        let num_send_neighbors: usize = field(&mut fields, "numSendNeighbors")?;
        let _total_send: usize = field(&mut fields, "totalSend")?;
        let mut send = Vec::with_capacity(num_send_neighbors);
        for _ in 0..num_send_neighbors {
            send.push(parse_schedule_line(&next()?)?);
        }

        expect_header(&mut next, "#Recv")?;
        let recv_header = next()?;
        let mut fields = recv_header.split_whitespace();
        let num_recv_neighbors: usize = field(&mut fields, "numRecvNeighbors")?;
        let _total_recv: usize = field(&mut fields, "totalRecv")?;
        let mut recv = Vec::with_capacity(num_recv_neighbors);
        for _ in 0..num_recv_neighbors {
            recv.push(parse_schedule_line(&next()?)?);
        }

        if p == 0 || rank >= p {
            return Err(anyhow!("rank {rank} is out of range for P={p}"))
                .typ(SystemError::Invariant);
        }

        Ok(PartitionFile {
            n,
            m,
            p,
            rank,
            basename,
            assign,
            local2global,
            local_rows,
            internal,
            external,
            send,
            recv,
        })
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expect_header(
    next: &mut impl FnMut() -> TypedResult<String>,
    expected: &str,
) -> TypedResult<()> {
    let line = next()?;
    if line.trim() != expected {
        return Err(anyhow!(
            "expected section header {expected}, found {:?}",
            line
        ))
        .typ(SystemError::PartitionFormat);
    }
    Ok(())
}

fn field<T: std::str::FromStr>(
    fields: &mut std::str::SplitWhitespace<'_>,
    what: &str,
) -> TypedResult<T> {
    fields
        .next()
        .ok_or_else(|| anyhow!("missing {what} field"))
        .typ(SystemError::PartitionFormat)?
        .parse()
        .map_err(|_| anyhow!("malformed {what} field"))
        .typ(SystemError::PartitionFormat)
}

fn parse_list(line: &str) -> TypedResult<Vec<usize>> {
    line.split_whitespace()
        .map(|tok| tok.parse::<usize>().map_err(|_| anyhow!("malformed index {tok:?}")))
        .collect::<Result<Vec<_>, _>>()
        .typ(SystemError::PartitionFormat)
}

fn parse_triple(line: &str) -> TypedResult<(usize, usize, f64)> {
    let mut fields = line.split_whitespace();
    let row: usize = field(&mut fields, "row")?;
    let col: usize = field(&mut fields, "col")?;
    let val: f64 = field(&mut fields, "val")?;
    Ok((row, col, val))
}

fn parse_schedule_line(line: &str) -> TypedResult<(usize, Vec<usize>)> {
    let mut fields = line.split_whitespace();
    let neighbor: usize = field(&mut fields, "neighbor rank")?;
    let len: usize = field(&mut fields, "len")?;
    let indices = fields
        .map(|tok| tok.parse::<usize>().map_err(|_| anyhow!("malformed index {tok:?}")))
        .collect::<Result<Vec<_>, _>>()
        .typ(SystemError::PartitionFormat)?;
    if indices.len() != len {
        return Err(anyhow!(
            "schedule line declared {len} indices, found {}",
            indices.len()
        ))
        .typ(SystemError::Invariant);
    }
    Ok((neighbor, indices))
}
