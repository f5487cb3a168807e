//! Video encoder selection.

use rf_core::config::RenderConfig;

/// Hardware methods [`resolve_hw_accel`] maps to a dedicated encoder.
pub const HW_ACCEL_METHODS: &[&str] = &["videotoolbox", "nvenc", "qsv", "amf"];

/// The ffmpeg video encoder for a hardware method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoder {
    /// Encoder name (e.g. `libx264`, `h264_nvenc`).
    pub codec: &'static str,
    /// Whether the encoder supports CRF-based quality control.
    pub use_crf: bool,
}

/// Resolve a hardware acceleration method to an encoder.
///
/// Unknown methods and `none` fall back to libx264.
pub fn resolve_hw_accel(hw_accel: Option<&str>) -> VideoEncoder {
    let codec = match hw_accel {
        Some("videotoolbox") => "h264_videotoolbox",
        Some("nvenc") => "h264_nvenc",
        Some("qsv") => "h264_qsv",
        Some("amf") => "h264_amf",
        _ => {
            return VideoEncoder {
                codec: "libx264",
                use_crf: true,
            }
        }
    };
    VideoEncoder {
        codec,
        use_crf: false,
    }
}

/// Encoder arguments for a render.
///
/// Software encodes use CRF and the configured preset; hardware encoders
/// don't support CRF and use bitrate targeting instead.
pub fn video_encode_args(render: &RenderConfig, use_hardware: bool) -> Vec<String> {
    let encoder = if use_hardware {
        resolve_hw_accel(Some(render.hw_accel.as_str()))
    } else {
        resolve_hw_accel(None)
    };

    let mut args: Vec<String> = vec!["-c:v".into(), encoder.codec.into()];
    if encoder.use_crf {
        args.extend([
            "-preset".into(),
            render.video_preset.clone(),
            "-crf".into(),
            render.video_crf.to_string(),
        ]);
    } else {
        args.extend(["-b:v", "8M", "-maxrate", "12M", "-bufsize", "16M"].map(String::from));
    }
    args.extend(["-pix_fmt", "yuv420p"].map(String::from));
    args
}
