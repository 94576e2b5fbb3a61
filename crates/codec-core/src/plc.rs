//! Packet loss concealment
//!
//! Pattern-matching concealment shared by the CVSD and mSBC decode paths.
//! A lost frame is rebuilt by locating the stretch of recent history that
//! best matches the last few milliseconds of audio and continuing the signal
//! from there. The first good frame after a loss burst is cross-faded back
//! into the real signal so the seam is not audible as a click.
//!
//! All processing happens on `f32` samples; the decode adapters convert at
//! the edges.

use std::f32::consts::PI;

/// Concealment parameters for one codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlcParams {
    /// Samples per concealment frame
    pub frame_size: usize,
    /// Length of the pattern search window
    pub window: usize,
    /// Length of the template matched against the window
    pub template: usize,
    /// Extrapolated samples kept at the start of the first good frame
    pub reconvergence: usize,
    /// Overlap-add length used for cross-fades
    pub overlap: usize,
    /// Consecutive bad frames after which the output is muted
    pub max_burst: u32,
}

impl PlcParams {
    /// CVSD link frames: 24 samples at 8 kHz
    pub const CVSD: PlcParams = PlcParams {
        frame_size: 24,
        window: 128,
        template: 10,
        reconvergence: 5,
        overlap: 8,
        max_burst: 100,
    };

    /// mSBC coder frames: 120 samples at 16 kHz
    pub const MSBC: PlcParams = PlcParams {
        frame_size: 120,
        window: 256,
        template: 64,
        reconvergence: 36,
        overlap: 16,
        max_burst: 40,
    };

    /// Same parameters for a coder with `frame_size`-sample frames
    ///
    /// Shrinking the frame scales the template, reconvergence and overlap
    /// lengths with it so they still fit inside one frame.
    pub fn with_frame_size(self, frame_size: usize) -> Self {
        if frame_size >= self.frame_size {
            return Self { frame_size, ..self };
        }
        let scale = |len: usize| len * frame_size / self.frame_size;
        Self {
            frame_size,
            template: scale(self.template),
            reconvergence: scale(self.reconvergence),
            overlap: scale(self.overlap),
            ..self
        }
    }

    /// Samples of history the pattern search needs
    pub fn history_len(&self) -> usize {
        self.window + self.frame_size - 1
    }

    fn buffer_len(&self) -> usize {
        self.history_len() + self.frame_size + self.reconvergence + self.overlap
    }
}

/// Concealment state for one decode session
#[derive(Debug, Clone)]
pub struct Concealer {
    params: PlcParams,
    /// `history_len` samples of past output followed by the extrapolation tail
    hist: Vec<f32>,
    /// Rising half of a raised-cosine window, `overlap` samples
    fade_in: Vec<f32>,
    best_lag: usize,
    bad_run: u32,
    extrapolating: bool,
    history_filled: usize,
}

impl Concealer {
    /// Create a new concealer
    pub fn new(params: PlcParams) -> Self {
        debug_assert!(params.reconvergence + params.overlap <= params.frame_size);
        debug_assert!(params.template < params.frame_size.max(1));

        let fade_in = (0..params.overlap)
            .map(|i| 0.5 * (1.0 - (PI * (i + 1) as f32 / (params.overlap + 1) as f32).cos()))
            .collect();

        Self {
            params,
            hist: vec![0.0; params.buffer_len()],
            fade_in,
            best_lag: 0,
            bad_run: 0,
            extrapolating: false,
            history_filled: 0,
        }
    }

    /// Parameters in use
    pub fn params(&self) -> &PlcParams {
        &self.params
    }

    /// Whether enough good audio has been seen to extrapolate from
    pub fn can_conceal(&self) -> bool {
        self.history_filled >= self.params.history_len()
    }

    /// Number of consecutive bad frames concealed so far
    pub fn bad_run(&self) -> u32 {
        self.bad_run
    }

    /// Process a correctly received frame
    ///
    /// `input` and `out` must both be `frame_size` samples long.
    pub fn good_frame(&mut self, input: &[f32], out: &mut [f32]) {
        let fs = self.params.frame_size;
        let lh = self.params.history_len();
        let rt = self.params.reconvergence;
        let olal = self.params.overlap;

        if self.bad_run > 0 && self.extrapolating {
            for i in 0..fs {
                out[i] = if i < rt {
                    self.hist[lh + i]
                } else if i < rt + olal {
                    let w = self.fade_in[i - rt];
                    self.hist[lh + i] * (1.0 - w) + input[i] * w
                } else {
                    input[i]
                };
            }
        } else {
            out[..fs].copy_from_slice(&input[..fs]);
        }

        self.hist[lh..lh + fs].copy_from_slice(&out[..fs]);
        self.shift_history();

        self.bad_run = 0;
        self.extrapolating = false;
        self.history_filled = (self.history_filled + fs).min(lh);
    }

    /// Synthesize a replacement for a lost frame into `out`
    ///
    /// Always writes exactly `frame_size` samples. Without enough history,
    /// or after `max_burst` consecutive losses, the replacement is silence.
    pub fn bad_frame(&mut self, out: &mut [f32]) {
        let fs = self.params.frame_size;
        let lh = self.params.history_len();
        let tail = fs + self.params.reconvergence + self.params.overlap;

        self.bad_run += 1;

        if !self.can_conceal() || self.bad_run > self.params.max_burst {
            self.extrapolating = false;
            out[..fs].fill(0.0);
            self.hist[lh..lh + tail].fill(0.0);
            self.shift_history();
            return;
        }

        if !self.extrapolating {
            self.best_lag = self.pattern_match() + self.params.template;
            let scale = self.amplitude_match();
            let last = self.hist[lh - 1];
            for i in 0..tail {
                let v = scale * self.hist[self.best_lag + i];
                self.hist[lh + i] = if i < self.params.overlap {
                    let w = self.fade_in[i];
                    last * (1.0 - w) + v * w
                } else {
                    v
                };
            }
            self.extrapolating = true;
        } else {
            for i in 0..tail {
                self.hist[lh + i] = self.hist[self.best_lag + i];
            }
        }

        out[..fs].copy_from_slice(&self.hist[lh..lh + fs]);
        self.shift_history();
    }

    /// Forget all history
    pub fn reset(&mut self) {
        self.hist.fill(0.0);
        self.best_lag = 0;
        self.bad_run = 0;
        self.extrapolating = false;
        self.history_filled = 0;
    }

    fn shift_history(&mut self) {
        let fs = self.params.frame_size;
        let len = self.hist.len();
        self.hist.copy_within(fs..len, 0);
        self.hist[len - fs..].fill(0.0);
    }

    /// Offset of the window segment that best matches the newest template
    fn pattern_match(&self) -> usize {
        let m = self.params.template;
        let lh = self.params.history_len();
        let template = &self.hist[lh - m..lh];
        let last_candidate = lh - self.params.frame_size - m;

        let mut best = 0;
        let mut best_score = f32::MIN;
        for start in 0..=last_candidate {
            let candidate = &self.hist[start..start + m];
            let mut dot = 0.0f32;
            let mut energy = 0.0f32;
            for (x, y) in template.iter().zip(candidate) {
                dot += x * y;
                energy += y * y;
            }
            let score = if energy > 1e-6 { dot / energy.sqrt() } else { 0.0 };
            if score > best_score {
                best_score = score;
                best = start;
            }
        }
        best
    }

    /// Gain bringing the matched segment to the level of the newest frame
    fn amplitude_match(&self) -> f32 {
        let fs = self.params.frame_size;
        let lh = self.params.history_len();
        let recent: f32 = self.hist[lh - fs..lh].iter().map(|v| v.abs()).sum();
        let matched: f32 = self.hist[self.best_lag..self.best_lag + fs]
            .iter()
            .map(|v| v.abs())
            .sum();

        if matched < 1e-6 {
            0.0
        } else {
            (recent / matched).clamp(0.75, 1.2)
        }
    }
}
