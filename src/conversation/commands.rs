//! Slash commands.

/// A recognised `/command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Onboarding,
    Profile,
    Practice,
    Progress { page: u32 },
    Settings,
    Cancel,
}

impl Command {
    /// Parse `/name [arg]`, also accepting the `/name@botname` form.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "onboarding" => Command::Onboarding,
            "profile" => Command::Profile,
            "practice" => Command::Practice,
            "progress" => Command::Progress {
                page: parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .filter(|p| *p >= 1)
                    .unwrap_or(1),
            },
            "settings" => Command::Settings,
            "cancel" => Command::Cancel,
            _ => return None,
        };
        Some(command)
    }
}
