pub mod cli;
pub mod commands;
pub mod scripts;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::channel::telegram::TelegramChannel;
use crate::channel::Channel;
use crate::config::Config;
use crate::delivery::Delivery;
use crate::manager::orchestrator::Orchestrator;
use crate::manager::task_registry::TaskRegistry;

use commands::CommandRouter;
use scripts::ScriptLibrary;

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Everything a command handler needs, shared between event threads.
pub struct BotContext {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub scripts: ScriptLibrary,
}

impl BotContext {
    pub fn new(config: Config, channel: Arc<dyn Channel>) -> Self {
        let registry = Arc::new(TaskRegistry::with_max_task_id(config.max_task_id));
        let delivery = Arc::new(Delivery::new(channel, config.delivery.clone()));
        let orchestrator = Orchestrator::new(registry, delivery, config.delivery.refresh_interval());
        let scripts = ScriptLibrary::new(config.scripts_dir.clone());
        info!("scripts folder: {}", scripts.dir().display());
        BotContext {
            config,
            orchestrator,
            scripts,
        }
    }
}

/// Long-polls Telegram forever, handling each event on its own thread.
pub fn serve_telegram(channel: &TelegramChannel, router: &CommandRouter) {
    info!("Bot started!");
    let mut offset = None;
    loop {
        match channel.poll(offset) {
            Ok((next_offset, events)) => {
                offset = next_offset;
                for event in events {
                    debug!("event: {:?}", event);
                    let router = router.clone();
                    thread::spawn(move || {
                        router.handle(event);
                    });
                }
            }
            Err(e) => {
                warn!("poll updates: {}", e);
                thread::sleep(POLL_ERROR_BACKOFF);
            }
        }
    }
}
