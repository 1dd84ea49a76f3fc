//! Best-first extraction of the n highest-probability chunks from a tag
//! lattice.
//!
//! Two bounded queues drive the search: completed chunks scored by exact
//! marginal probability, and extension states for chunks that could still
//! grow. A state is only expanded while it outscores the best completed
//! chunk, so the search explores just enough of the O(length²) span space
//! to produce the requested results.

use crate::chunk::Chunk;
use crate::error::ChunkError;
use crate::hmm::TagLattice;
use crate::util::{ln_to_log2, log_sum_exp, BoundedPriorityQueue};

/// A chunk candidate that may still extend leftward.
///
/// `pos` is the leftmost interior position reached so far; `end_pos` is
/// the fixed right boundary. The score is the exact log mass of "the
/// chunk covers `pos..=end_pos` as interior and ends at `end_pos`",
/// accumulated from the right.
struct ExtensionState {
    pos: usize,
    end_pos: usize,
    type_idx: usize,
}

/// Lazy iterator over the n best chunks of a lattice.
///
/// Scores on returned chunks are log2 conditional probabilities.
pub struct NBestChunkIter<'a> {
    lattice: &'a TagLattice,
    token_starts: Vec<usize>,
    token_ends: Vec<usize>,
    chunk_types: Vec<String>,
    begin_ids: Vec<usize>,
    in_ids: Vec<usize>,
    out_id: usize,
    chunk_queue: BoundedPriorityQueue<(usize, usize, usize)>,
    state_queue: BoundedPriorityQueue<ExtensionState>,
    max_results: usize,
    num_results: usize,
}

impl<'a> NBestChunkIter<'a> {
    pub(crate) fn new(
        lattice: &'a TagLattice,
        token_starts: &[usize],
        token_ends: &[usize],
        max_results: usize,
        begin_prefix: &str,
        in_prefix: &str,
        out_tag: &str,
    ) -> Result<Self, ChunkError> {
        if token_starts.len() != lattice.num_tokens() {
            return Err(ChunkError::MisalignedInput(format!(
                "token starts must line up with the lattice: {} starts, {} tokens",
                token_starts.len(),
                lattice.num_tokens()
            )));
        }
        if token_ends.len() != lattice.num_tokens() {
            return Err(ChunkError::MisalignedInput(format!(
                "token ends must line up with the lattice: {} ends, {} tokens",
                token_ends.len(),
                lattice.num_tokens()
            )));
        }
        for i in 1..token_starts.len() {
            if token_starts[i - 1] > token_starts[i] || token_ends[i - 1] > token_ends[i] {
                return Err(ChunkError::MisalignedInput(format!(
                    "token offsets must be sorted, violated at index {i}"
                )));
            }
        }
        for i in 0..token_starts.len() {
            if token_starts[i] > token_ends[i] {
                return Err(ChunkError::MisalignedInput(format!(
                    "token {i} end precedes start: {}-{}",
                    token_starts[i], token_ends[i]
                )));
            }
        }

        let mut chunk_types = Vec::new();
        let mut begin_ids = Vec::new();
        let mut in_ids = Vec::new();
        for id in 0..lattice.num_tags() {
            if let Some(kind) = lattice.tag(id).strip_prefix(in_prefix) {
                let begin = format!("{begin_prefix}{kind}");
                if let Some(begin_id) = lattice.tag_id(&begin) {
                    chunk_types.push(kind.to_string());
                    begin_ids.push(begin_id);
                    in_ids.push(id);
                }
            }
        }
        let out_id = lattice.tag_id(out_tag).unwrap_or(0);

        let mut iter = Self {
            lattice,
            token_starts: token_starts.to_vec(),
            token_ends: token_ends.to_vec(),
            chunk_types,
            begin_ids,
            in_ids,
            out_id,
            chunk_queue: BoundedPriorityQueue::new(max_results),
            state_queue: BoundedPriorityQueue::new(max_results),
            max_results,
            num_results: 0,
        };
        iter.seed();
        Ok(iter)
    }

    /// Seed the queues with every single-token chunk and every one-token
    /// extension state.
    fn seed(&mut self) {
        let lattice = self.lattice;
        if lattice.num_tokens() == 0 || lattice.num_tags() == 0 {
            return;
        }
        let last_n = lattice.num_tokens() - 1;
        for j in 0..self.chunk_types.len() {
            let begin_id = self.begin_ids[j];
            let in_id = self.in_ids[j];
            // A chunk on the last token has no successors; its marginal is
            // the plain tag probability.
            self.chunk_queue.offer(
                lattice.log_probability(last_n, begin_id),
                (last_n, last_n, j),
            );
            if last_n > 0 {
                self.state_queue.offer(
                    lattice.log_backward(last_n, in_id),
                    ExtensionState {
                        pos: last_n,
                        end_pos: last_n,
                        type_idx: j,
                    },
                );
            }
            for n in 0..last_n {
                let non_cont = self.non_continue_mass(j, n, begin_id);
                self.chunk_queue.offer(
                    non_cont + lattice.log_forward(n, begin_id) - lattice.log_z(),
                    (n, n, j),
                );
            }
            for n in 1..last_n {
                let non_cont = self.non_continue_mass(j, n, in_id);
                self.state_queue.offer(
                    non_cont,
                    ExtensionState {
                        pos: n,
                        end_pos: n,
                        type_idx: j,
                    },
                );
            }
        }
    }

    /// Log mass of every successor tag at `n + 1` that does not continue a
    /// type-`j` chunk: out, any begin, and interiors of other types.
    fn non_continue_mass(&self, j: usize, n: usize, from_tag: usize) -> f64 {
        let lattice = self.lattice;
        let mut buf = Vec::with_capacity(lattice.num_tags());
        buf.push(
            lattice.log_backward(n + 1, self.out_id)
                + lattice.log_transition(n, from_tag, self.out_id),
        );
        for j2 in 0..self.begin_ids.len() {
            buf.push(
                lattice.log_backward(n + 1, self.begin_ids[j2])
                    + lattice.log_transition(n, from_tag, self.begin_ids[j2]),
            );
            if j2 != j {
                buf.push(
                    lattice.log_backward(n + 1, self.in_ids[j2])
                        + lattice.log_transition(n, from_tag, self.in_ids[j2]),
                );
            }
        }
        log_sum_exp(&buf)
    }

    /// Expand extension states while the best pending state outscores the
    /// best completed chunk.
    fn search(&mut self) {
        while let Some(state_score) = self.state_queue.peek_score() {
            let expand = match self.chunk_queue.peek_score() {
                None => true,
                Some(chunk_score) => chunk_score < state_score,
            };
            if !expand {
                return;
            }
            let (score, state) = self.state_queue.poll().expect("peeked state");
            self.extend(score, state);
        }
    }

    /// Complete the state as a chunk beginning one token to the left, and
    /// grow a further extension state if room remains.
    fn extend(&mut self, score: f64, state: ExtensionState) {
        let lattice = self.lattice;
        let begin_id = self.begin_ids[state.type_idx];
        let in_id = self.in_ids[state.type_idx];
        self.chunk_queue.offer(
            score
                + lattice.log_forward(state.pos - 1, begin_id)
                + lattice.log_transition(state.pos - 1, begin_id, in_id)
                - lattice.log_z(),
            (state.pos - 1, state.end_pos, state.type_idx),
        );
        if state.pos > 1 {
            self.state_queue.offer(
                score + lattice.log_transition(state.pos - 1, in_id, in_id),
                ExtensionState {
                    pos: state.pos - 1,
                    end_pos: state.end_pos,
                    type_idx: state.type_idx,
                },
            );
        }
    }
}

impl Iterator for NBestChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.num_results >= self.max_results {
            return None;
        }
        self.search();
        let (score, (start_tok, end_tok, type_idx)) = self.chunk_queue.poll()?;
        self.num_results += 1;
        let chunk = Chunk::with_score(
            self.token_starts[start_tok],
            self.token_ends[end_tok],
            self.chunk_types[type_idx].as_str(),
            ln_to_log2(score),
        )
        .expect("token offsets validated at construction");
        Some(chunk)
    }
}
