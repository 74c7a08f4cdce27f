use std::fs;
use std::path::Path;

use ffmpeg::util::frame::video::Video;
use ffmpeg::{format, media};
use ffmpeg_next::{self as ffmpeg};
use image::RgbImage;
use tracing::debug;

use crate::paths::DataLayout;
use crate::schema::FrameRecord;

/// Decodes `input_path` and saves one frame every `interval_sec` seconds as
/// PNG under the video's frame directory.
pub(crate) fn capture_frames(
    input_path: &Path,
    video_id: &str,
    interval_sec: f64,
    layout: &DataLayout,
) -> anyhow::Result<Vec<FrameRecord>> {
    if !(interval_sec.is_finite() && interval_sec > 0.0) {
        anyhow::bail!("frame interval must be positive, got {interval_sec}");
    }
    ffmpeg::init()?;

    let mut input = format::input(&input_path)?;
    let video_stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::Error::from(ffmpeg::Error::StreamNotFound))?;
    let video_stream_index = video_stream.index();
    let time_base: f64 = video_stream.time_base().into();

    let context_decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
    let mut decoder = context_decoder.decoder().video()?;

    let mut scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        format::Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;

    fs::create_dir_all(layout.frames_dir(video_id))?;

    let mut next_sec = 0.0;
    let mut frames = Vec::new();
    let mut process_decoded_frames =
        |decoder: &mut ffmpeg::decoder::Video| -> anyhow::Result<()> {
            let mut decoded = Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let Some(pts) = decoded.timestamp() else {
                    return Err(anyhow::anyhow!("No timestamp"));
                };
                let time_sec = pts as f64 * time_base;
                if time_sec < next_sec {
                    continue;
                }
                next_sec += interval_sec;

                let mut rgb_frame = Video::empty();
                scaler.run(&decoded, &mut rgb_frame)?;
                let image = to_rgb_image(&rgb_frame)?;

                let frame_index = frames.len() as u32;
                let out_path = layout.frame(video_id, frame_index);
                image.save(&out_path)?;
                debug!(frame_index, time_sec, path = %out_path.display(), "saved frame");

                frames.push(FrameRecord {
                    video_id: video_id.to_owned(),
                    frame_index,
                    time_sec,
                    frame_path: out_path.to_string_lossy().into_owned(),
                    is_blurry: false,
                    is_too_dark: false,
                });
            }
            Ok(())
        };

    for (stream, packet) in input.packets() {
        if stream.index() == video_stream_index {
            decoder.send_packet(&packet)?;
            process_decoded_frames(&mut decoder)?;
        }
    }
    decoder.send_eof()?;
    process_decoded_frames(&mut decoder)?;

    Ok(frames)
}

/// Copies an RGB24 frame into an image buffer, dropping the row padding.
fn to_rgb_image(frame: &Video) -> anyhow::Result<RgbImage> {
    let (width, height) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let row_len = width as usize * 3;
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        pixels.extend_from_slice(&data[row * stride..row * stride + row_len]);
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or(anyhow::anyhow!("Failed to create image buffer"))
}
