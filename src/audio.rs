//! Audible alert support for accessibility.
//!
//! Price alerts can ring the terminal bell so a threshold cross is heard
//! even when the terminal is in the background.

use crate::models::AlertKind;

/// Beep patterns for different alert directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSound {
    /// Single beep: price rose above a target
    Single,
    /// Double beep: price fell below a target
    Double,
}

impl AlertSound {
    pub fn for_kind(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Above => AlertSound::Single,
            AlertKind::Below => AlertSound::Double,
        }
    }
}

/// Ring the terminal bell. The BEL character works in most terminal
/// emulators on Unix/Linux/macOS and Windows alike.
pub fn play_sound(sound: AlertSound) {
    let beep_count = match sound {
        AlertSound::Single => 1,
        AlertSound::Double => 2,
    };

    for _ in 0..beep_count {
        print!("\x07");
        use std::io::Write;
        let _ = std::io::stdout().flush();

        // Small delay between beeps
        std::thread::sleep(std::time::Duration::from_millis(200));
    }
}

/// Non-blocking variant for async contexts: schedules the beeps on a
/// separate thread and returns immediately.
pub fn play_sound_async(sound: AlertSound) {
    std::thread::spawn(move || {
        play_sound(sound);
    });
}
