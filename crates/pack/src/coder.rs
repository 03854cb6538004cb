//! The bit-range coder and its context model.
//!
//! Encoder and decoder share one model: per context plane a linear-probed table of 6-byte cells
//! `(key: u32, count0: u8, count1: u8)`, keyed by the mask-selected previous bytes. The encoder
//! seeds its probe from a hash of the key; the decoder always probes from the start of the plane.
//! Each side picks cells deterministically from the same key stream, so the counts they mix stay
//! identical and the range split never drifts.

use snafu::prelude::*;

use crate::error::{BadParametersSnafu, BufferOverflowSnafu, Result};
use crate::{CompressionParameters, MAX_CONTEXT_COUNT, MAX_CONTEXT_SIZE};

/// Zero bytes kept in front of the work buffers so backwards reads of the first real bytes stay
/// in bounds, the way the runtime decompressor relies on the zeroed space below its buffers.
const GUARD: usize = 8;

/// A coder instance owning its counter table. The table is 64 MiB and allocated once; reuse the
/// instance when compressing repeatedly, as the parameter search does.
pub struct Coder {
    counters: Vec<u8>,
}

impl Default for Coder {
    fn default() -> Self {
        Self::new()
    }
}

impl Coder {
    /// Allocates a coder with a zeroed counter table.
    #[must_use]
    pub fn new() -> Self {
        Self { counters: vec![0; MAX_CONTEXT_COUNT * MAX_CONTEXT_SIZE] }
    }

    /// Compresses `input` with a fixed parameter set.
    ///
    /// The returned stream is in encode order; callers that feed the runtime decompressor (or
    /// [`decompress`](Self::decompress)) must reverse it first.
    ///
    /// # Errors
    /// Returns [`BufferOverflow`](crate::Error::BufferOverflow) if the stream would exceed
    /// `max_len` bytes, or [`BadParameters`](crate::Error::BadParameters) for an unusable
    /// parameter set.
    pub fn compress(
        &mut self, params: &CompressionParameters, input: &[u8], max_len: usize,
    ) -> Result<Vec<u8>> {
        ensure!(
            (1..=MAX_CONTEXT_COUNT).contains(&params.context_count),
            BadParametersSnafu { reason: "context count out of range" }
        );

        let mut model = Model::new(&mut self.counters, params, true);
        // Rolling window of previous bytes; window[0] collects the bits of the byte in flight,
        // seeded with 1 as the byte-boundary sentinel.
        let mut window = [1u8, 0, 0, 0, 0, 0, 0, 0];

        let mut out = Vec::new();
        let mut x1: u32 = 0;
        let mut x2: u32 = 0xFFFF_FFFF;

        for &byte in input {
            let mut byte = u32::from(byte);
            for bit in 0..8 {
                let (n0, n1) = model.mix();
                let xmid = x1 + ((u64::from(n0) * u64::from(x2 - x1)) / u64::from(n0 + n1)) as u32;

                let y: u32;
                if byte & 0x80 != 0 {
                    x1 = xmid + 1;
                    y = 1;
                } else {
                    x2 = xmid;
                    y = 0;
                }

                window[0] = (window[0] << 1) | y as u8;
                if bit == 7 {
                    // Start new byte
                    window.copy_within(0..7, 1);
                    window[0] = 1;
                }

                model.update(y, |i| window[i]);

                while (x1 ^ x2) & 0xFF00_0000 == 0 {
                    out.push((x2 >> 24) as u8);
                    ensure!(out.len() < max_len, BufferOverflowSnafu);
                    x1 <<= 8;
                    x2 = (x2 << 8) | 0xFF;
                }
                byte <<= 1;
            }
        }

        while (x1 ^ x2) & 0xFF00_0000 == 0 {
            out.push((x2 >> 24) as u8);
            ensure!(out.len() < max_len, BufferOverflowSnafu);
            x1 <<= 8;
            x2 = (x2 << 8) | 0xFF;
        }
        // First byte where the bounds disagree.
        out.push((x2 >> 24) as u8);
        // The stream is stored reversed, so this byte becomes the decoder's very first probe
        // word. If it compares greater than the first xmid the decoder would start with a 1 bit;
        // a trailing zero keeps the comparison below any split.
        if (x2 >> 16) & 0xFF < 0xC3 {
            ensure!(out.len() < max_len, BufferOverflowSnafu);
            out.push(0);
        }
        Ok(out)
    }

    /// Decompresses `out_len` bytes from a *reversed* stream, reading it backwards starting at
    /// its last four bytes.
    ///
    /// `params` must describe a usable configuration; every caller in this workspace hands over
    /// parameters that already passed [`compress`](Self::compress) or text parsing.
    #[must_use]
    pub fn decompress(
        &mut self, params: &CompressionParameters, stream: &[u8], out_len: usize,
    ) -> Vec<u8> {
        debug_assert!((1..=MAX_CONTEXT_COUNT).contains(&params.context_count));

        let mut model = Model::new(&mut self.counters, params, false);

        let mut input = vec![0u8; GUARD + stream.len()];
        input[GUARD..].copy_from_slice(stream);
        // Backwards cursor over the stream; for very short streams the reads spill into the
        // leading guard zeros.
        let mut apos = (GUARD + stream.len()).saturating_sub(4);

        let mut out = vec![0u8; GUARD + out_len + 1];
        let mut pos = GUARD;
        out[pos] = 1;

        let mut x1: u32 = 0;
        let mut x2: u32 = 0xFFFF_FFFF;

        for j in (1..=out_len * 8).rev() {
            let (n0, n1) = model.mix();
            let xmid = x1 + ((u64::from(n0) * u64::from(x2 - x1)) / u64::from(n0 + n1)) as u32;

            let v = u32::from_le_bytes([input[apos], input[apos + 1], input[apos + 2], input[apos + 3]]);
            out[pos] <<= 1;
            let y: u32;
            if v <= xmid {
                x2 = xmid;
                y = 0;
            } else {
                out[pos] += 1;
                x1 = xmid + 1;
                y = 1;
            }

            if (j - 1) & 7 == 0 {
                // Start new byte
                pos += 1;
                out[pos] = 1;
            }

            model.update(y, |i| out[pos - i]);

            while (x1 ^ x2) >> 24 == 0 {
                x1 <<= 8;
                x2 = (x2 << 8) | 0xFF;
                // Streams encoded under pathological parameters can desynchronize the decoder;
                // pinning the cursor at the guard keeps that observable instead of fatal.
                apos = apos.saturating_sub(1);
            }
        }

        out[GUARD..GUARD + out_len].to_vec()
    }
}

/// Per-call model state: the active planes of the counter table plus one current-cell index per
/// context.
struct Model<'a> {
    counters: &'a mut [u8],
    count: usize,
    weights: [u8; MAX_CONTEXT_COUNT],
    masks: [u8; MAX_CONTEXT_COUNT],
    /// Current cell per context, as an absolute byte index of the cell's count pair.
    current: [usize; MAX_CONTEXT_COUNT],
    /// Encoder probes from the key hash; the decoder always probes from the plane start.
    hashed: bool,
}

impl<'a> Model<'a> {
    fn new(counters: &'a mut [u8], params: &CompressionParameters, hashed: bool) -> Self {
        counters[..MAX_CONTEXT_SIZE * params.context_count].fill(0);
        let mut current = [0usize; MAX_CONTEXT_COUNT];
        for (m, slot) in current.iter_mut().enumerate().take(params.context_count) {
            *slot = m * MAX_CONTEXT_SIZE;
        }
        Self {
            counters,
            count: params.context_count,
            weights: params.weights,
            masks: params.contexts,
            current,
            hashed,
        }
    }

    /// Mixed 0/1 frequencies for the next bit.
    fn mix(&self) -> (u32, u32) {
        let mut n0: u32 = 1;
        let mut n1: u32 = 1;
        for m in 0..self.count {
            let weight = u32::from(self.weights[m]);
            n0 += u32::from(self.counters[self.current[m]]) * weight;
            n1 += u32::from(self.counters[self.current[m] + 1]) * weight;
        }
        (n0, n1)
    }

    /// Counts the emitted bit in every context, then advances each context to the cell for the
    /// key formed from the window bytes its mask selects.
    fn update<F: Fn(usize) -> u8>(&mut self, y: u32, window: F) {
        let y = y as usize;
        for m in 0..self.count {
            let cell = self.current[m];
            if self.counters[cell + y] < 255 {
                self.counters[cell + y] += 1;
            }
            if self.counters[cell + 1 - y] > 2 {
                self.counters[cell + 1 - y] = self.counters[cell + 1 - y] / 2 + 1;
            }

            let mask = self.masks[m];
            let mut key: u32 = 0;
            for i in 0..8 {
                if mask & (1 << i) != 0 {
                    key = (key << 8) + u32::from(window(i));
                }
            }
            self.current[m] = self.find_cell(m, key);
        }
    }

    /// Linear probe for `key` in plane `m`, claiming the first empty cell on a miss. Returns the
    /// byte index of the cell's count pair.
    fn find_cell(&mut self, m: usize, key: u32) -> usize {
        let plane = m * MAX_CONTEXT_SIZE;
        let mut c = if self.hashed {
            24 * (((key as usize) & 0xFFFF) ^ ((key as usize) >> 16))
        } else {
            0
        };
        loop {
            let at = plane + c;
            let found = u32::from_le_bytes([
                self.counters[at],
                self.counters[at + 1],
                self.counters[at + 2],
                self.counters[at + 3],
            ]);
            if found == 0 || found == key {
                self.counters[at..at + 4].copy_from_slice(&key.to_le_bytes());
                return at + 4;
            }
            c += 6;
        }
    }
}
