use cw_engine::audio::AudioSink;
use cw_engine::config::EngineSettings;
use cw_engine::sender::check_character;
use cw_engine::{Clock, Generator};

#[cfg(feature = "audio")]
fn make_sink(settings: &EngineSettings) -> Box<dyn AudioSink> {
    Box::new(cw_engine::audio::CpalSink::with_slope(
        settings.audio.slope_shape,
        settings.audio.slope_usecs,
    ))
}

#[cfg(not(feature = "audio"))]
fn make_sink(_settings: &EngineSettings) -> Box<dyn AudioSink> {
    log::info!("Built without the audio feature, tones are only logged");
    Box::new(cw_engine::NullSink::new())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let loaded = EngineSettings::load_or_default();
    if let Some(notice) = &loaded.notice {
        log::warn!("{}", notice);
    }
    let settings = loaded.settings;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let text = if args.is_empty() {
        "PARIS PARIS".to_string()
    } else {
        args.join(" ").to_uppercase()
    };
    let sendable: String = text
        .chars()
        .filter(|c| {
            let ok = check_character(*c);
            if !ok {
                log::warn!("Skipping unsendable character {:?}", c);
            }
            ok
        })
        .collect();

    let clock = Clock::realtime()?;
    let generator =
        Generator::with_device(make_sink(&settings), clock, settings.audio.device.clone())?;
    settings.apply(&generator)?;
    generator.start()?;

    log::info!(
        "Sending {:?} at {} WPM, {} Hz",
        sendable,
        generator.send_speed(),
        generator.frequency()
    );
    for character in sendable.chars() {
        // Long texts would overrun the tone queue
        if generator.tone_queue_length() > 2000 {
            generator.wait_for_tone_queue_level(1000)?;
        }
        generator.send_character(character)?;
    }
    generator.wait_for_tone_queue()?;
    generator.stop()?;
    Ok(())
}
