//! Fixed user-facing texts.

use std::time::Duration;

pub const PREDICTION_FAIL_MESSAGE: &str = "Sorry, looks like OpenAI could not identify this.";

pub const MEDIA_NOT_FOUND_MESSAGE: &str =
    "Sorry, system couldn't extract any media from this message.";

pub const PENDING_APPROVED_MESSAGE: &str =
    "Hello, I just approved your DM. Please send your message again";

/// Onboarding text sent to users who do not follow the account yet.
pub fn welcome_message(request_delay: Duration) -> String {
    let minutes = (request_delay.as_secs() / 60).max(1);
    format!(
        "\nHi there! Thanks for using our app. 🎉\n\
Make sure you’re following our account to use this service. \
Send us a clip or image, and we’ll identify the movie or series for you.\n\
Note: You can make 1 request every {minutes} minutes.\n"
    )
}

pub fn cooldown_message(seconds: u64) -> String {
    format!("You need to wait {seconds} seconds before sending another message.")
}
