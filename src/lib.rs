pub mod app;
pub mod brightness;
pub mod buttons;
pub mod config;
pub mod console;
pub mod cron;
pub mod debug_flags;
pub mod decode;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod http_client;
pub mod image_proxy;
pub mod layout;
pub mod music;
pub mod raw_socket;
pub mod scheduler;
pub mod source;
pub mod time_sync;
pub mod transit;
pub mod weather;
pub mod weather_icons;
pub mod widgets;

#[cfg(target_os = "espidf")]
pub mod esp;
#[cfg(not(target_os = "espidf"))]
pub mod host;
