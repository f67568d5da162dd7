/// IRC text formatting: bold and mIRC colour control codes.
///
/// See <https://modern.ircdocs.horse/formatting> for the codes.
const BOLD: char = '\x02';
const COLOR: char = '\x03';
const RESET: char = '\x0f';

/// A text style. Copyable so partial styles can be extended freely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    bold: bool,
    fg: Option<u8>,
    bg: Option<u8>,
}

/// Bold, forced to white. Some clients render plain bold as a theme colour.
pub const BOLD_WHITE: Style = Style::new().bold().fg(98);

/// Green background, used for "up" states.
pub const GOOD: Style = Style::new().color(98, 43);

/// Orange background, used for "in progress" states.
pub const PENDING: Style = Style::new().color(98, 41);

/// Red background, used for "down" states and alerts.
pub const BAD: Style = Style::new().color(98, 40);

impl Style {
    pub const fn new() -> Self {
        Self {
            bold: false,
            fg: None,
            bg: None,
        }
    }

    pub const fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub const fn fg(mut self, fg: u8) -> Self {
        self.fg = Some(fg);
        self
    }

    pub const fn color(mut self, fg: u8, bg: u8) -> Self {
        self.fg = Some(fg);
        self.bg = Some(bg);
        self
    }

    /// Control codes that switch this style on.
    pub fn prefix(&self) -> String {
        let mut out = String::new();
        if self.bold {
            out.push(BOLD);
        }
        if let Some(fg) = self.fg {
            out.push(COLOR);
            out.push_str(&fg.to_string());
            if let Some(bg) = self.bg {
                out.push(',');
                out.push_str(&bg.to_string());
            }
        }
        out
    }

    /// Wrap `text` in this style, resetting all formatting afterwards.
    pub fn paint(&self, text: &str) -> String {
        format!("{}{text}{RESET}", self.prefix())
    }
}
