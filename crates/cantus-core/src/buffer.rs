//! Channel buffer kernels.
//!
//! Node and sink buffers are stored uninterleaved as `Vec<Vec<f32>>`, one
//! inner vector per channel, every channel exactly one block long. The
//! kernels here are additive so fan-in accumulates rather than overwrites.

/// Allocates `channels` zeroed channels of `block_size` frames.
pub fn channels(count: usize, block_size: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; block_size]; count]
}

/// Grows or shrinks to `count` channels; new channels are zeroed.
pub fn resize_channels(buffers: &mut Vec<Vec<f32>>, count: usize, block_size: usize) {
    buffers.truncate(count);
    buffers.resize_with(count, || vec![0.0; block_size]);
}

/// Zeroes every channel.
pub fn zero(buffers: &mut [Vec<f32>]) {
    for channel in buffers {
        channel.fill(0.0);
    }
}

/// `dst[i] += src[i]` over the shorter of the two.
#[inline]
pub fn add_into(src: &[f32], dst: &mut [f32]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

/// `dst[i] += gain * src[i]` over the shorter of the two.
#[inline]
pub fn mul_add_into(gain: f32, src: &[f32], dst: &mut [f32]) {
    if gain == 0.0 {
        return;
    }
    for (d, s) in dst.iter_mut().zip(src) {
        *d += gain * *s;
    }
}

/// `buf[i] *= gain`.
#[inline]
pub fn scale(gain: f32, buf: &mut [f32]) {
    for s in buf {
        *s *= gain;
    }
}

/// Writes `frames` frames of uninterleaved `src` into interleaved `dst`.
///
/// `dst` must hold at least `frames * src.len()` samples.
pub fn interleave(src: &[Vec<f32>], frames: usize, dst: &mut [f32]) {
    let count = src.len();
    if count == 0 {
        return;
    }
    for (frame, out) in dst.chunks_exact_mut(count).take(frames).enumerate() {
        for (ch, sample) in out.iter_mut().enumerate() {
            *sample = src[ch][frame];
        }
    }
}

/// Splits interleaved `src` into uninterleaved `dst`. Inverse of [`interleave`].
pub fn deinterleave(src: &[f32], dst: &mut [Vec<f32>]) {
    let count = dst.len();
    if count == 0 {
        return;
    }
    for (frame, input) in src.chunks_exact(count).enumerate() {
        for (ch, sample) in input.iter().enumerate() {
            if let Some(slot) = dst[ch].get_mut(frame) {
                *slot = *sample;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_channels_zero_fills_growth() {
        let mut bufs = channels(1, 4);
        bufs[0].fill(1.0);
        resize_channels(&mut bufs, 3, 4);
        assert_eq!(bufs.len(), 3);
        assert_eq!(bufs[0], vec![1.0; 4]);
        assert_eq!(bufs[2], vec![0.0; 4]);
        resize_channels(&mut bufs, 1, 4);
        assert_eq!(bufs.len(), 1);
    }

    #[test]
    fn test_add_and_mul_add_accumulate() {
        let mut dst = vec![1.0; 4];
        add_into(&[2.0; 4], &mut dst);
        mul_add_into(0.5, &[2.0; 4], &mut dst);
        assert_eq!(dst, vec![4.0; 4]);
    }

    #[test]
    fn test_interleave_layout() {
        let src = vec![vec![1.0, 2.0], vec![10.0, 20.0]];
        let mut dst = vec![0.0; 4];
        interleave(&src, 2, &mut dst);
        assert_eq!(dst, vec![1.0, 10.0, 2.0, 20.0]);

        let mut back = channels(2, 2);
        deinterleave(&dst, &mut back);
        assert_eq!(back, src);
    }
}
