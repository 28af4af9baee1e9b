//! Wiring shared by the device and host entry points: config to clients to
//! widgets to the scheduler.

use log::{info, warn};

use crate::brightness::BrightnessKnob;
use crate::buttons::ButtonController;
use crate::config::Config;
use crate::http_client::{QueueHandle, RequestQueue, SharedIndicator, Transport, DEFAULT_TIMEOUT};
use crate::image_proxy::{ImageProxy, ProxySettings};
use crate::music::{MusicClient, MusicCredentials};
use crate::scheduler::{halt_with_message, FrameSink, InputSource, Scheduler};
use crate::transit::{TransitClient, TransitSettings};
use crate::weather::WeatherClient;
use crate::widgets::announcements::AnnouncementsWidget;
use crate::widgets::now_playing::NowPlayingWidget;
use crate::widgets::train_time::{TrainSettings, TrainTimeWidget};
use crate::widgets::Widget;

/// Widgets in the order `cfg.widgets` lists them. Unknown names are skipped.
pub fn build_widgets(cfg: &Config, queue: &QueueHandle) -> Vec<Box<dyn Widget>> {
    let weather = WeatherClient::with_base_url(
        queue.clone(),
        cfg.latitude.unwrap_or_default(),
        cfg.longitude.unwrap_or_default(),
        cfg.temperature_unit,
        &cfg.weather_url,
    );

    let mut widgets: Vec<Box<dyn Widget>> = Vec::new();
    for name in &cfg.widgets {
        match name.as_str() {
            "train_time" => {
                let transit = TransitClient::new(
                    queue.clone(),
                    TransitSettings {
                        base_url: cfg.transit_url.clone(),
                        api_token: cfg.transit_token.clone(),
                        agency: cfg.agency.clone(),
                        stop_code: cfg.stop_code.clone(),
                    },
                );
                let settings = TrainSettings {
                    route_prefix: cfg.route_prefix.clone(),
                    max_trains: cfg.max_trains,
                    refresh: cfg.refresh,
                    time_format: cfg.time_format,
                    temperature_unit: cfg.temperature_unit,
                    time_to_stop: cfg.time_to_stop,
                    ..TrainSettings::default()
                };
                widgets.push(Box::new(TrainTimeWidget::new(transit, weather.clone(), settings)));
            }
            "now_playing" => {
                let music = MusicClient::new(
                    queue.clone(),
                    MusicCredentials {
                        client_id: cfg.spotify_client_id.clone(),
                        client_secret: cfg.spotify_client_secret.clone(),
                        refresh_token: cfg.spotify_refresh_token.clone(),
                    },
                );
                let proxy = ImageProxy::new(queue.clone(), ProxySettings::new(&cfg.image_proxy));
                widgets.push(Box::new(NowPlayingWidget::new(music, proxy, DEFAULT_TIMEOUT)));
            }
            "announcements" => {
                let widget = AnnouncementsWidget::new(
                    &cfg.announcements,
                    cfg.announcement_rotation,
                    weather.clone(),
                    Box::new(|path: &str| std::fs::read(path)),
                )
                .with_colors(cfg.text_color, cfg.progress_color);
                widgets.push(Box::new(widget));
            }
            other => warn!("Unknown widget '{}' ignored", other),
        }
    }
    info!(
        "Widgets: {}",
        widgets.iter().map(|w| w.name()).collect::<Vec<_>>().join(", ")
    );
    widgets
}

/// Validate `cfg`, build everything and run the main loop. A bad config
/// halts with its message on the panel.
pub fn run<T, S, I>(cfg: &Config, transport: T, mut sink: S, mut input: I) -> !
where
    T: Transport,
    S: FrameSink,
    I: InputSource,
{
    if let Err(e) = cfg.validate() {
        warn!("Config error: {}", e);
        halt_with_message(&mut sink, &e.lines);
    }

    let activity = SharedIndicator::new();
    let queue = RequestQueue::new(transport, Box::new(activity.clone()));
    let widgets = build_widgets(cfg, &queue.handle());
    if widgets.is_empty() {
        halt_with_message(&mut sink, &["Set widgets".to_string(), "in config".to_string()]);
    }

    let buttons = ButtonController::new(cfg.hold, cfg.combo_hold);
    buttons.check_initial(input.buttons());
    let knob = BrightnessKnob::new(cfg.brightness_min, cfg.brightness_max, cfg.knob_invert);

    Scheduler::new(queue, activity, widgets, sink, input, buttons)
        .with_knob(knob)
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MapSource, KEY_LATITUDE, KEY_LONGITUDE, KEY_WIDGETS};
    use crate::http_client::tests::fake_queue;

    #[test]
    fn widgets_follow_configured_order() {
        let src = MapSource::new()
            .with(KEY_LATITUDE, "37.77")
            .with(KEY_LONGITUDE, "-122.42")
            .with(KEY_WIDGETS, "announcements, clock, train_time");
        let cfg = Config::load(&src);
        let (queue, _log) = fake_queue();
        let widgets = build_widgets(&cfg, &queue.handle());
        let names: Vec<_> = widgets.iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["announcements", "train_time"]);
    }

    #[test]
    fn building_widgets_sends_nothing() {
        let cfg = Config::load(&MapSource::new().with(KEY_LATITUDE, "1").with(KEY_LONGITUDE, "2"));
        let (queue, log) = fake_queue();
        let widgets = build_widgets(&cfg, &queue.handle());
        assert_eq!(widgets.len(), 3);
        assert!(queue.handle().is_empty());
        assert!(log.borrow().requests.is_empty());
    }
}
