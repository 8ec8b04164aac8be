use crate::error::ScopeError;
use crate::types::Waveform;
use textplots::{Chart, Plot, Shape};

/// Determine the best scale and unit prefix for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else if max_value >= 1e-6 {
        (1e6, "μ")
    } else if max_value >= 1e-9 {
        (1e9, "n")
    } else {
        (1e12, "p")
    }
}

/// Largest absolute value among the finite inputs, 0 if there are none
fn max_abs<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(0.0, |acc, v| acc.max(v.abs()))
}

/// Waveform points scaled for plotting, holes dropped.
///
/// Returns the frame together with the time and voltage unit prefixes.
fn scaled_frame(waveform: &Waveform) -> (Vec<(f32, f32)>, &'static str, &'static str) {
    let last_time = waveform.time_at(waveform.len().saturating_sub(1));
    let (time_scale, time_unit) = determine_scale(max_abs([waveform.x_origin, last_time]));
    let (volt_scale, volt_unit) = determine_scale(max_abs(waveform.samples.iter().copied()));

    let frame = waveform
        .points()
        .filter(|(_, v)| v.is_finite())
        .map(|(t, v)| ((t * time_scale) as f32, (v * volt_scale) as f32))
        .collect();
    (frame, time_unit, volt_unit)
}

/// Plot a waveform in the terminal with automatic unit scaling
///
/// # Arguments
/// * `waveform` - The record to plot
/// * `width` - Optional plot width (default: 140)
/// * `height` - Optional plot height (default: 60)
///
/// # Examples
/// ```
/// use rusty_scope::{Waveform, plotting::plot_waveform};
///
/// let waveform = Waveform {
///     channel: "channel1".to_string(),
///     x_origin: -5e-4,
///     x_increment: 1e-6,
///     samples: (0..1000).map(|i| (i as f64 / 50.0).sin()).collect(),
/// };
/// plot_waveform(&waveform, None, None).unwrap();
/// ```
pub fn plot_waveform(
    waveform: &Waveform,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), ScopeError> {
    let (frame, time_unit, volt_unit) = scaled_frame(waveform);
    if frame.len() < 2 {
        return Err(ScopeError::InvalidArgument(format!(
            "{} has fewer than two valid samples to plot",
            waveform.channel
        )));
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(60);
    let x_min = frame.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let x_max = frame.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let y_min = frame.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let y_max = frame.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

    println!("{}", waveform.channel);
    println!("X-axis: {time_unit}s | Y-axis: {volt_unit}V");
    println!(
        "{} samples | Values: {y_min:.3} to {y_max:.3} {volt_unit}V",
        waveform.len()
    );
    println!("{}", "─".repeat(width));

    Chart::new(width as u32, height as u32, x_min, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    println!("Time ({time_unit}s) →");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform(samples: Vec<f64>) -> Waveform {
        Waveform {
            channel: "channel1".to_string(),
            x_origin: -5e-4,
            x_increment: 1e-6,
            samples,
        }
    }

    #[test]
    fn test_determine_scale() {
        assert_eq!(determine_scale(5.0), (1.0, ""));
        assert_eq!(determine_scale(0.005), (1e3, "m"));
        assert_eq!(determine_scale(5e-6), (1e6, "μ"));
        assert_eq!(determine_scale(5e-9), (1e9, "n"));
        assert_eq!(determine_scale(5e-12), (1e12, "p"));
    }

    #[test]
    fn test_scaled_frame_units() {
        let (frame, time_unit, volt_unit) = scaled_frame(&waveform(vec![0.01, f64::NAN, -0.02]));
        assert_eq!(time_unit, "μ");
        assert_eq!(volt_unit, "m");
        assert_eq!(frame.len(), 2);
        assert!((frame[0].0 - (-500.0)).abs() < 1e-3);
        assert!((frame[1].1 - (-20.0)).abs() < 1e-3);
    }

    #[test]
    fn test_plot_waveform_basic() {
        let data = waveform(vec![1.0, 2.0, 3.0, 2.0, 1.0]);
        assert!(plot_waveform(&data, Some(60), Some(20)).is_ok());
    }

    #[test]
    fn test_plot_empty_waveform() {
        assert!(plot_waveform(&waveform(vec![]), None, None).is_err());
        assert!(plot_waveform(&waveform(vec![f64::NAN, 1.0]), None, None).is_err());
    }
}
