//! Reply keyboards shown to the owner and the button labels they carry.

use teloxide::types::{KeyboardButton, KeyboardMarkup};

use super::commands::Action;

pub const BTN_START: &str = "▶️ Start";
pub const BTN_PAUSE: &str = "⏸ Pause";
pub const BTN_STOP: &str = "⏹ Stop";
pub const BTN_RESTART: &str = "🔄 Restart";
pub const BTN_STATS: &str = "📊 Stats";
pub const BTN_INFO: &str = "ℹ️ Info";
pub const BTN_HELP: &str = "❓ Help";
pub const BTN_SETTINGS: &str = "⚙️ Settings";
pub const BTN_AI_TOGGLE: &str = "🤖 Toggle AI";
pub const BTN_BACK: &str = "⬅️ Back";

fn keyboard(rows: &[&[&str]]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = rows
        .iter()
        .map(|row| row.iter().map(|label| KeyboardButton::new(*label)).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

/// Main menu; the first row depends on whether publishing is running.
pub fn main_menu(running: bool) -> KeyboardMarkup {
    let lifecycle: &[&str] = if running {
        &[BTN_PAUSE, BTN_STOP]
    } else {
        &[BTN_START, BTN_RESTART]
    };
    keyboard(&[lifecycle, &[BTN_STATS, BTN_INFO], &[BTN_HELP, BTN_SETTINGS]])
}

pub fn settings_menu() -> KeyboardMarkup {
    keyboard(&[&[BTN_AI_TOGGLE], &[BTN_BACK]])
}

pub(crate) fn action_for_label(text: &str) -> Action {
    match text.trim() {
        BTN_START => Action::Start,
        BTN_PAUSE | BTN_STOP => Action::Stop,
        BTN_RESTART => Action::Restart,
        BTN_STATS => Action::Status,
        BTN_INFO => Action::Info,
        BTN_HELP => Action::Welcome,
        BTN_SETTINGS => Action::Settings,
        BTN_AI_TOGGLE => Action::AiToggle,
        BTN_BACK => Action::Back,
        _ => Action::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(kb: &KeyboardMarkup) -> Vec<Vec<String>> {
        kb.keyboard
            .iter()
            .map(|row| row.iter().map(|b| b.text.clone()).collect())
            .collect()
    }

    #[test]
    fn main_menu_follows_run_state() {
        let running = labels(&main_menu(true));
        assert_eq!(running[0], vec![BTN_PAUSE, BTN_STOP]);

        let stopped = labels(&main_menu(false));
        assert_eq!(stopped[0], vec![BTN_START, BTN_RESTART]);
        assert_eq!(stopped[1], vec![BTN_STATS, BTN_INFO]);
        assert_eq!(stopped[2], vec![BTN_HELP, BTN_SETTINGS]);
    }

    #[test]
    fn every_button_maps_to_an_action() {
        let mut all = labels(&main_menu(true));
        all.extend(labels(&main_menu(false)));
        all.extend(labels(&settings_menu()));
        for label in all.into_iter().flatten() {
            assert_ne!(action_for_label(&label), Action::Unknown, "{label}");
        }
        assert_eq!(action_for_label("hello"), Action::Unknown);
        assert_eq!(action_for_label(" ⏸ Pause "), Action::Stop);
    }
}
