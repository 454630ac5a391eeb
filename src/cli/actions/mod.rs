pub mod run;

use crate::exporter::Settings;

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        settings: Settings,
    },
}
