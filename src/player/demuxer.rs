use crate::core::{InputOptions, PlayerError, Result, StreamSource, StreamTiming};
use crate::player::decoder::FfmpegVideoDecoder;
use crate::player::demuxer_source::{DemuxInput, MediaBackend, MediaPacket};
use crate::player::watchdog::InterruptHandle;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{ffi, format, media};
use log::{debug, info};
use std::ffi::{c_int, c_void, CString};
use std::ptr;

/// 基于 FFmpeg 的解封装/解码后端
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl MediaBackend for FfmpegBackend {
    type Input = FfmpegInput;

    fn open_input(
        &self,
        source: &StreamSource,
        options: &InputOptions,
        interrupt: InterruptHandle,
    ) -> Result<FfmpegInput> {
        FfmpegInput::open(source, options, interrupt)
    }
}

/// FFmpeg 数据包
pub struct FfmpegPacket(pub(crate) ffmpeg::Packet);

impl MediaPacket for FfmpegPacket {
    fn stream_index(&self) -> usize {
        self.0.stream()
    }
}

/// FFmpeg 阻塞调用期间轮询的中断回调
unsafe extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let handle = &*(opaque as *const InterruptHandle);
    c_int::from(handle.should_abort())
}

/// 已打开的 FFmpeg 输入
pub struct FfmpegInput {
    input_ctx: format::context::Input,
    // 回调的 opaque 指向这里，必须比 input_ctx 晚释放（字段按声明顺序 drop）
    _interrupt: Box<InterruptHandle>,
    source: String,
}

// AVFormatContext 只在读包线程里使用
unsafe impl Send for FfmpegInput {}

impl FfmpegInput {
    fn open(
        source: &StreamSource,
        options: &InputOptions,
        interrupt: InterruptHandle,
    ) -> Result<Self> {
        let locator = source.locator();
        info!("正在打开输入: {}", source);

        let path = CString::new(locator.as_str())
            .map_err(|_| PlayerError::OpenError(format!("路径包含 NUL 字符: {}", locator)))?;
        let format_name = options
            .format
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| PlayerError::OpenError("输入格式名包含 NUL 字符".into()))?;

        let mut dictionary = ffmpeg::Dictionary::new();
        for (key, value) in options.dictionary_entries() {
            debug!("输入选项 {}={}", key, value);
            dictionary.set(key, value);
        }

        let interrupt = Box::new(interrupt);

        let input_ctx = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(PlayerError::OpenError("avformat_alloc_context() 失败".into()));
            }
            (*ctx).interrupt_callback = ffi::AVIOInterruptCB {
                callback: Some(interrupt_callback),
                opaque: &*interrupt as *const InterruptHandle as *mut c_void,
            };

            let input_format = match &format_name {
                Some(name) => {
                    let found = ffi::av_find_input_format(name.as_ptr());
                    if found.is_null() {
                        ffi::avformat_free_context(ctx);
                        return Err(PlayerError::OpenError(format!(
                            "不支持的输入格式: {}",
                            name.to_string_lossy()
                        )));
                    }
                    found as *const ffi::AVInputFormat
                }
                None => ptr::null(),
            };

            let mut opts = dictionary.disown();
            let ret =
                ffi::avformat_open_input(&mut ctx, path.as_ptr(), input_format as _, &mut opts);
            ffmpeg::Dictionary::own(opts);

            // 失败时 avformat_open_input 已释放 ctx
            if ret < 0 {
                return Err(PlayerError::OpenError(format!(
                    "{}: {}",
                    locator,
                    ffmpeg::Error::from(ret)
                )));
            }

            format::context::Input::wrap(ctx)
        };

        Ok(Self {
            input_ctx,
            _interrupt: interrupt,
            source: locator,
        })
    }
}

impl DemuxInput for FfmpegInput {
    type Packet = FfmpegPacket;
    type Decoder = FfmpegVideoDecoder;

    fn find_stream_info(&mut self) -> Result<()> {
        let ret = unsafe {
            ffi::avformat_find_stream_info(self.input_ctx.as_mut_ptr(), ptr::null_mut())
        };
        if ret < 0 {
            return Err(PlayerError::OpenError(format!(
                "无法获取流信息: {}",
                ffmpeg::Error::from(ret)
            )));
        }
        Ok(())
    }

    fn find_video_track(&self) -> Option<usize> {
        self.input_ctx
            .streams()
            .find(|s| s.parameters().medium() == media::Type::Video)
            .map(|s| s.index())
    }

    fn stream_timing(&self, track: usize) -> StreamTiming {
        match self.input_ctx.stream(track) {
            Some(stream) => {
                let rate = stream.avg_frame_rate();
                let fps = (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate));
                StreamTiming::new(f64::from(stream.time_base()), fps)
            }
            None => StreamTiming::new(1.0 / 90_000.0, None),
        }
    }

    fn open_decoder(&mut self, track: usize) -> Result<FfmpegVideoDecoder> {
        let stream = self.input_ctx.stream(track).ok_or(PlayerError::NoVideoStream)?;
        FfmpegVideoDecoder::from_stream(&stream)
    }

    fn read_packet(&mut self) -> Result<Option<FfmpegPacket>> {
        // 不用 packets() 迭代器：它会吞掉读错误并继续重试
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(FfmpegPacket(packet))),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {} ({})", self.source, self.input_ctx.format().name())
    }
}
