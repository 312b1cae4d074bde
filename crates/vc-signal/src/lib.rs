/// モデル入力のサンプルレート。
pub const MODEL_INPUT_RATE: u32 = 16_000;

/// 内部クリップを防ぐための最大振幅。
pub const PEAK_CEILING: f32 = 0.95;

/// 波形の最大絶対値を返す。
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|v| v.abs())
        .fold(0.0_f32, |acc, v| acc.max(v))
}

/// 最大振幅が `ceiling` を超える場合だけ、ちょうど `ceiling` になるよう縮小する。
/// 小さい入力は増幅しない。
pub fn limit_peak(samples: &mut [f32], ceiling: f32) {
    let peak = peak(samples);
    if peak <= ceiling {
        return;
    }
    let gain = ceiling / peak;
    for sample in samples {
        *sample *= gain;
    }
}

/// 二乗平均平方根。空入力は 0。
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|v| v * v).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// シンプルな線形補間リサンプラ。
///
/// 出力長は `round(len * dst_rate / src_rate)`。
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return Vec::new();
    }
    if src_rate == dst_rate {
        return samples.to_vec();
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = (i as f64) / ratio;
        let left = (src_pos.floor() as usize).min(samples.len() - 1);
        let right = (left + 1).min(samples.len() - 1);
        let frac = (src_pos - left as f64).clamp(0.0, 1.0) as f32;

        let v = samples[left] * (1.0 - frac) + samples[right] * frac;
        out.push(v);
    }

    out
}

/// 秒数をサンプル数へ変換する（四捨五入）。
pub fn seconds_to_samples(seconds: f64, rate: u32) -> usize {
    (seconds * rate as f64).round().max(0.0) as usize
}
