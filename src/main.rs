use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use stream_player::{FfmpegBackend, Player, PlayerEvent, PlayerOptions};

/// 无界面的网络视频流播放器
///
/// 打开 URL、本地文件或采集设备（如 `v4l2:///dev/video0`），按节拍解码并打印事件。
#[derive(Parser, Debug)]
#[clap(name = "stream_player")]
struct Opt {
    /// 流地址、文件路径或设备伪 URL
    url: String,

    /// JSON 格式的 PlayerOptions
    #[clap(long)]
    config: Option<PathBuf>,

    /// 收到 N 帧后停止
    #[clap(long = "frames")]
    max_frames: Option<u64>,

    /// 结束时把最后一帧保存到该路径（格式由扩展名决定）
    #[clap(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Opt::parse();

    info!("🎬 stream_player 启动");
    stream_player::init()?;

    let options = match &args.config {
        Some(path) => PlayerOptions::from_json_file(path)
            .with_context(|| format!("无法加载配置: {}", path.display()))?,
        None => PlayerOptions::default(),
    };

    let (player, events) = Player::with_events(FfmpegBackend);
    player.start_play(&args.url, options);

    let mut frames: u64 = 0;
    let mut failure = None;
    for event in events.iter() {
        match event {
            PlayerEvent::StreamStarted => info!("▶️  开始出帧"),
            PlayerEvent::FrameReceived(frame) => {
                frames += 1;
                if frames == 1 || frames % 100 == 0 {
                    info!(
                        "🎞️  第 {} 帧: {}x{} @ {:.3}s",
                        frames,
                        frame.width(),
                        frame.height(),
                        frame.timestamp()
                    );
                }
                if args.max_frames.is_some_and(|max| frames >= max) {
                    info!("已达到 {} 帧，停止播放", frames);
                    player.stop();
                }
            }
            PlayerEvent::StreamFailed(message) => {
                error!("❌ 播放失败: {}", message);
                failure = Some(message);
                break;
            }
            PlayerEvent::StreamStopped => {
                info!("⏹️  播放结束，共 {} 帧", frames);
                break;
            }
        }
    }
    player.stop();

    if let Some(path) = &args.snapshot {
        match player.current_frame() {
            Ok(frame) => {
                frame
                    .save(path)
                    .with_context(|| format!("无法保存截图: {}", path.display()))?;
                info!("📸 已保存最后一帧到 {}", path.display());
            }
            Err(e) => warn!("⚠ 没有可保存的帧: {}", e),
        }
    }

    if let Some(message) = failure {
        bail!(message);
    }
    Ok(())
}
