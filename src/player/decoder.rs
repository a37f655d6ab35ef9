use crate::core::{PlayerError, Result};
use crate::player::demuxer::FfmpegPacket;
use crate::player::demuxer_source::{DecodeStatus, DisplayBuffer, PictureInfo, VideoDecoder};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, software, util};
use log::debug;

/// FFmpeg 软件视频解码器，输出 RGB24
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    picture: util::frame::Video,
    has_picture: bool,
}

// SwsContext 本身不是 Send，但解码器只在拉帧线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub fn from_stream(stream: &format::stream::Stream) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video().map_err(|e| match e {
            ffmpeg::Error::DecoderNotFound => PlayerError::DecoderNotFound,
            other => PlayerError::OpenError(format!("无法打开解码器: {}", other)),
        })?;

        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            scaler: None,
            picture: util::frame::Video::empty(),
            has_picture: false,
        })
    }

    /// 源格式或尺寸变化时重建转换器
    fn ensure_scaler(
        &mut self,
        format: util::format::Pixel,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let reusable = self.scaler.as_ref().is_some_and(|scaler| {
            let input = scaler.input();
            input.format == format && input.width == width && input.height == height
        });
        if !reusable {
            debug!("创建 RGB24 转换器: {:?} {}x{}", format, width, height);
            self.scaler = Some(software::scaling::Context::get(
                format,
                width,
                height,
                util::format::Pixel::RGB24,
                width,
                height,
                software::scaling::Flags::BICUBIC,
            )?);
        }
        Ok(())
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    type Packet = FfmpegPacket;

    fn submit_packet(&mut self, packet: &FfmpegPacket) -> Result<()> {
        match self.decoder.send_packet(&packet.0) {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PlayerError::DecodeError(format!("avcodec_send_packet() 失败: {}", e))),
        }
    }

    fn submit_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(PlayerError::DecodeError(format!("冲刷解码器失败: {}", e))),
        }
    }

    fn receive_picture(&mut self) -> Result<DecodeStatus> {
        match self.decoder.receive_frame(&mut self.picture) {
            Ok(()) => {
                self.has_picture = true;
                let (pkt_dts, repeat_pict) = unsafe {
                    let raw = self.picture.as_ptr();
                    ((*raw).pkt_dts, (*raw).repeat_pict)
                };
                // 没有有效 DTS 的画面交给视频时钟推算
                let best_effort_timestamp = if pkt_dts == ffi::AV_NOPTS_VALUE {
                    None
                } else {
                    self.picture.timestamp()
                };
                Ok(DecodeStatus::Picture(PictureInfo {
                    best_effort_timestamp,
                    repeat_pict,
                }))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == util::error::EAGAIN => {
                Ok(DecodeStatus::NeedMoreInput)
            }
            Err(ffmpeg::Error::Eof) => Ok(DecodeStatus::EndOfStream),
            Err(e) => Err(PlayerError::DecodeError(format!(
                "avcodec_receive_frame() 失败: {}",
                e
            ))),
        }
    }

    fn convert_picture(&mut self) -> Result<DisplayBuffer> {
        if !self.has_picture {
            return Err(PlayerError::DecodeError("没有可转换的画面".into()));
        }

        let (format, width, height) = (
            self.picture.format(),
            self.picture.width(),
            self.picture.height(),
        );
        self.ensure_scaler(format, width, height)?;

        let mut rgb = util::frame::Video::empty();
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("转换器未初始化".into()))?;
        scaler.run(&self.picture, &mut rgb)?;

        Ok(DisplayBuffer {
            width,
            height,
            stride: rgb.stride(0),
            data: rgb.data(0).to_vec(),
        })
    }
}
