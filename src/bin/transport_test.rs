use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use speaker_sync::api::{HttpPlaybackApi, PlaybackApi, SkipDirection};
use speaker_sync::artwork::HttpArtworkFetcher;
use speaker_sync::config::AppConfig;
use speaker_sync::session::{Control, SessionHandle};
use speaker_sync::shared_state::SharedState;
use speaker_sync::transport::{self, DeviceCommand};
use speaker_sync::units::format_position;
use speaker_sync::visualizer::{VisualOutput, VisualizerMode};

fn print_state(state: &SharedState) {
    let playback = &state.playback;
    println!("\n🎵 NOW PLAYING 🎵");
    println!("   Link:   {:?}", state.connection);
    println!("   Device: {} ({}, vol {})", state.device.status, state.source_mode.display_name, state.device.volume);
    println!("   Track:  {}", playback.track);
    println!("   Artist: {}", playback.artist);
    println!("   Album:  {}", playback.album);

    match &playback.artwork {
        Some(url) => println!("   Art:    {}", url),
        None => println!("   Art:    [No Artwork]"),
    }
    if let Some(color) = state.theme.artwork_color {
        println!("   Color:  {} (highlight {})", color.to_hex(), state.theme.highlight.to_hex());
    }

    println!(
        "   State:  {} {} / {}{}",
        if playback.is_playing() { "▶ Playing" } else { "⏸ Paused" },
        format_position(state.position_ms),
        format_position(playback.duration_ms),
        if playback.progress_frozen { " (frozen)" } else { "" }
    );

    match &state.visualization.output {
        VisualOutput::Idle { .. } => println!("   Viz:    [idle]"),
        VisualOutput::Bands(bands) => {
            let levels: Vec<String> = bands.iter().map(|b| format!("{:.2}", b.scale)).collect();
            println!("   Viz:    bands [{}]", levels.join(" "));
        }
        VisualOutput::Circle { radius_scale, .. } => println!("   Viz:    circle r={:.2}", radius_scale),
    }
}

fn main() -> anyhow::Result<()> {
    println!("========================================");
    println!("   speaker-sync Transport Test CLI      ");
    println!("========================================");
    println!("Commands:");
    println!("  [i] info         Show current state");
    println!("  [p] play/pause   Toggle playback");
    println!("  [n] next         Skip to next track");
    println!("  [b] back         Skip to previous track");
    println!("  [v] vol <0-100>  Set device volume");
    println!("  [s] src <id>     Switch device source");
    println!("  [m] mode         Toggle bands / circle");
    println!("  [r] reconnect    Retry a disabled transport");
    println!("  [q] quit         Exit");
    println!("----------------------------------------");

    let mut config = AppConfig::load().unwrap_or_default();
    if std::env::args().any(|a| a == "--demo") {
        config.demo_mode = true;
    }

    let api = HttpPlaybackApi::from_config(&config.api).map(|api| Arc::new(api) as Arc<dyn PlaybackApi>);
    let fetcher = HttpArtworkFetcher::new(Duration::from_millis(config.api.timeout_ms.max(1)));
    let transport = transport::from_config(&config.transport, config.demo_mode);

    println!("[*] Starting session...");
    let mut session = SessionHandle::start(config, transport, api, fetcher)?;

    // Give the transport a moment to deliver the first state
    std::thread::sleep(Duration::from_millis(500));

    let mut mode = VisualizerMode::Bands;
    let stdin = io::stdin();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next();

        match cmd {
            "i" | "info" => print_state(&session.state()),
            "p" | "play" => {
                println!("[CMD] Toggling Play/Pause");
                session.toggle_play_pause();
            }
            "n" | "next" => {
                println!("[CMD] Skipping to Next Track");
                session.skip(SkipDirection::Next);
            }
            "b" | "back" => {
                println!("[CMD] Skipping to Previous Track");
                session.skip(SkipDirection::Previous);
            }
            "v" | "vol" => match arg.and_then(|a| a.parse::<u8>().ok()) {
                Some(volume) => {
                    println!("[CMD] Volume -> {}", volume.min(100));
                    session.send(Control::Device(DeviceCommand::SetVolume(volume)));
                }
                None => println!("Usage: v <0-100>"),
            },
            "s" | "src" => match arg {
                Some(source) => {
                    println!("[CMD] Source -> {}", source);
                    session.send(Control::Device(DeviceCommand::SetSource(source.to_string())));
                }
                None => println!("Usage: s <source id>"),
            },
            "m" | "mode" => {
                mode = match mode {
                    VisualizerMode::Bands => VisualizerMode::Circle,
                    VisualizerMode::Circle => VisualizerMode::Bands,
                };
                println!("[CMD] Visualizer mode -> {:?}", mode);
                session.send(Control::SetVisualizerMode(mode));
            }
            "r" | "reconnect" => {
                println!("[CMD] Reconnecting");
                session.send(Control::Reconnect);
            }
            "q" | "quit" => {
                println!("[CMD] Quitting");
                break;
            }
            "" => {} // Ignore empty enter
            _ => println!("Unknown command. Use i, p, n, b, v, s, m, r or q."),
        }
    }

    session.stop();
    Ok(())
}
