use rubato::{FastFixedIn, PolynomialDegree, Resampler};

#[derive(thiserror::Error, Debug)]
pub enum ResampleError {
    #[error("cannot build resampler {from_hz} Hz -> {to_hz} Hz: {details}")]
    Construction {
        from_hz: u32,
        to_hz: u32,
        details: String,
    },
    #[error("resampling failed: {0}")]
    Process(String),
}

/// Resamples a mono buffer in a single pass over the whole clip.
pub(super) fn to_rate(input: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>, ResampleError> {
    if input.is_empty() || from_hz == to_hz {
        return Ok(input.to_vec());
    }

    let mut resampler = FastFixedIn::<f32>::new(
        f64::from(to_hz) / f64::from(from_hz),
        1.0,
        PolynomialDegree::Cubic,
        input.len(),
        1,
    )
    .map_err(|e| ResampleError::Construction {
        from_hz,
        to_hz,
        details: e.to_string(),
    })?;

    let delay = resampler.output_delay();
    let mut planar = resampler
        .process(&[input], None)
        .map_err(|e| ResampleError::Process(e.to_string()))?;

    let mut out = planar.pop().unwrap_or_default();
    out.drain(..delay.min(out.len()));
    Ok(out)
}
