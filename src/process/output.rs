//! Prefix-multiplexed terminal output
//!
//! Every process started by a build writes through one shared
//! [`OutputRegistry`]. Each source gets a stable color on first use and a
//! right-aligned label so concurrent builds stay column-aligned. A line is
//! written while holding the sink lock, so lines from different sources never
//! interleave mid-line.

use console::Style;
use regex::Regex;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

/// Nine 256-color codes assigned to prefixes in registration order, then reused
const PREFIX_PALETTE: [u8; 9] = [51, 33, 10, 5, 1, 226, 250, 197, 202];

/// Named colors available to highlight templates as `{name}`
const THEME: [(&str, u8); 9] = [
    ("cyan", 51),
    ("blue", 33),
    ("green", 10),
    ("purple", 5),
    ("red", 1),
    ("yellow", 226),
    ("gray", 250),
    ("pink", 197),
    ("orange", 202),
];

const RESET: &str = "\x1b[0m";

fn ansi(code: u8) -> String {
    format!("\x1b[38;5;{}m", code)
}

/// Whether a line already carries ANSI escape sequences
pub fn has_ansi(line: &str) -> bool {
    line.contains("\x1b[") || line.contains("\\e[")
}

/// Kind of step notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    Success,
    Failure,
    Skip,
    Info,
    Clean,
}

impl Event {
    fn marker(&self) -> &'static str {
        match self {
            Self::Start => "[RUN]",
            Self::Success => "[OK]",
            Self::Failure => "[FAIL]",
            Self::Skip => "[SKIP]",
            Self::Info => "[INFO]",
            Self::Clean => "[CLEAN]",
        }
    }

    fn style(&self) -> Style {
        match self {
            Self::Start => Style::new().yellow(),
            Self::Success => Style::new().green(),
            Self::Failure => Style::new().red().bold(),
            Self::Skip => Style::new().dim(),
            Self::Info => Style::new().cyan(),
            Self::Clean => Style::new().magenta(),
        }
    }
}

/// Compiled regex -> template highlight rules
///
/// Templates may reference theme colors as `{cyan}`, `{reset}`, ... and
/// capture groups as `$1` / `${name}`.
#[derive(Debug, Clone, Default)]
pub struct ColorRules {
    rules: Vec<(Regex, String)>,
}

impl ColorRules {
    /// Compile rules, resolving color placeholders now
    ///
    /// With `colors` disabled the placeholders resolve to nothing.
    pub fn compile<'a, I>(rules: I, colors: bool) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut compiled = Vec::new();
        for (pattern, template) in rules {
            let regex = Regex::new(pattern)?;
            compiled.push((regex, Self::render_template(template, colors)));
        }
        Ok(Self { rules: compiled })
    }

    fn render_template(template: &str, colors: bool) -> String {
        let mut rendered = template.to_string();
        for (name, code) in THEME {
            let value = if colors { ansi(code) } else { String::new() };
            rendered = rendered.replace(&format!("{{{}}}", name), &value);
        }
        let reset = if colors { RESET } else { "" };
        rendered.replace("{reset}", reset)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order; lines that already contain escapes pass through
    pub fn apply(&self, line: &str) -> String {
        if self.rules.is_empty() || has_ansi(line) {
            return line.to_string();
        }
        let mut line = line.to_string();
        for (regex, replacement) in &self.rules {
            line = regex.replace_all(&line, replacement.as_str()).into_owned();
        }
        line
    }
}

/// Splits a byte stream into complete lines
///
/// Bytes are held until a newline arrives; [`LineBuffer::finish`] flushes the
/// trailing partial line once the stream ends.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(Self::decode(&raw[..raw.len() - 1]));
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(Self::decode(&raw))
    }

    fn decode(raw: &[u8]) -> String {
        let line = String::from_utf8_lossy(raw);
        line.strip_suffix('\r').unwrap_or(&line).to_string()
    }
}

#[derive(Debug, Default)]
struct PrefixState {
    colors: HashMap<String, usize>,
    width: usize,
}

/// Process-wide registry of output prefixes and the shared sink
///
/// Prefix state is append-only: a prefix keeps the color it was first given
/// and the alignment width only grows.
pub struct OutputRegistry {
    sink: Mutex<Box<dyn Write + Send>>,
    prefixes: Mutex<PrefixState>,
    colors: bool,
    rules: ColorRules,
}

impl OutputRegistry {
    /// Registry writing to stdout
    pub fn stdout(colors: bool, rules: ColorRules) -> Self {
        Self::with_sink(Box::new(std::io::stdout()), colors, rules)
    }

    /// Registry writing to an arbitrary sink
    pub fn with_sink(sink: Box<dyn Write + Send>, colors: bool, rules: ColorRules) -> Self {
        Self {
            sink: Mutex::new(sink),
            prefixes: Mutex::new(PrefixState::default()),
            colors,
            rules,
        }
    }

    /// Colorless registry capturing everything it writes (for tests and reports)
    pub fn capture() -> (Self, CaptureBuffer) {
        let buffer = CaptureBuffer::default();
        let registry = Self::with_sink(Box::new(buffer.clone()), false, ColorRules::default());
        (registry, buffer)
    }

    pub fn colors(&self) -> bool {
        self.colors
    }

    /// Register a prefix if unseen, returning its palette slot and the current width
    pub fn register(&self, prefix: &str) -> (usize, usize) {
        let mut state = lock(&self.prefixes);
        let next = state.colors.len();
        let slot = *state
            .colors
            .entry(prefix.to_string())
            .or_insert(next % PREFIX_PALETTE.len());
        state.width = state.width.max(prefix.chars().count());
        (slot, state.width)
    }

    fn header(&self, prefix: Option<&str>) -> String {
        let Some(prefix) = prefix else {
            return String::new();
        };
        let (slot, width) = self.register(prefix);
        let label = format!("{:>width$} ", prefix, width = width);
        let styled = Style::new()
            .color256(PREFIX_PALETTE[slot])
            .bold()
            .force_styling(self.colors)
            .apply_to(label);
        format!("{}| ", styled)
    }

    fn write_raw(&self, text: &str) {
        let mut sink = lock(&self.sink);
        // A broken terminal must not fail the build
        let _ = sink.write_all(text.as_bytes());
        let _ = sink.flush();
    }

    /// Write one complete process output line, highlighted
    pub fn line(&self, prefix: Option<&str>, line: &str) {
        let body = if self.rules.is_empty() || has_ansi(line) {
            line.to_string()
        } else if self.colors {
            format!("{}{}", self.rules.apply(line), RESET)
        } else {
            self.rules.apply(line)
        };
        let text = format!("{}{}\n", self.header(prefix), body);
        self.write_raw(&text);
    }

    /// Echo a command line about to run
    pub fn command(&self, prefix: Option<&str>, command: &str) {
        let body = Style::new()
            .color256(250)
            .bold()
            .force_styling(self.colors)
            .apply_to(format!("+ {}", command.replace('\n', "\\n")));
        let text = format!("{}{}\n", self.header(prefix), body);
        self.write_raw(&text);
    }

    /// Write a step notification
    pub fn event(&self, prefix: Option<&str>, event: Event, message: &str) {
        let marker = event.style().force_styling(self.colors).apply_to(event.marker());
        let text = format!("{}{} {}\n", self.header(prefix), marker, message);
        self.write_raw(&text);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared in-memory sink
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.bytes).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"hel").is_empty());
        assert_eq!(buffer.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(buffer.push(b"ld\r\n\n"), vec!["world", ""]);
        assert_eq!(buffer.finish(), None);

        buffer.push(b"tail");
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn prefixes_keep_first_color_and_width_grows() {
        let (registry, _) = OutputRegistry::capture();
        assert_eq!(registry.register("a"), (0, 1));
        assert_eq!(registry.register("longer"), (1, 6));
        assert_eq!(registry.register("a"), (0, 6));
    }

    #[test]
    fn colors_repeat_after_nine_prefixes() {
        let (registry, _) = OutputRegistry::capture();
        let slots: Vec<usize> = (0..10)
            .map(|i| registry.register(&format!("p{i}")).0)
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 0]);
    }

    #[test]
    fn prefixed_lines_are_right_aligned() {
        let (registry, buffer) = OutputRegistry::capture();
        registry.register("backend");
        registry.line(Some("web"), "hello");
        registry.line(None, "plain");

        assert_eq!(buffer.lines(), vec!["    web | hello", "plain"]);
    }

    #[test]
    fn events_and_commands_render_markers() {
        let (registry, buffer) = OutputRegistry::capture();
        registry.command(Some("app"), "echo 'a\nb'");
        registry.event(Some("app"), Event::Success, "Run(echo)");

        let lines = buffer.lines();
        assert_eq!(lines[0], "app | + echo 'a\\nb'");
        assert_eq!(lines[1], "app | [OK] Run(echo)");
    }

    #[test]
    fn rules_substitute_captures_without_colors() {
        let rules = ColorRules::compile([(r"^(\w+):", "{cyan}<$1>{reset}:")], false).unwrap();
        assert_eq!(rules.apply("key: value"), "<key>: value");
    }

    #[test]
    fn rules_emit_theme_codes_with_colors() {
        let rules = ColorRules::compile([(r"error", "{red}error{reset}")], true).unwrap();
        assert_eq!(rules.apply("an error"), "an \x1b[38;5;1merror\x1b[0m");
    }

    #[test]
    fn rules_apply_in_declared_order() {
        let forward = ColorRules::compile([("a", "b"), ("b", "c")], false).unwrap();
        let reversed = ColorRules::compile([("b", "c"), ("a", "b")], false).unwrap();
        assert_eq!(forward.apply("a"), "c");
        assert_eq!(reversed.apply("a"), "b");
    }

    #[test]
    fn rules_skip_lines_already_colored() {
        let rules = ColorRules::compile([(r"x", "y")], false).unwrap();
        assert_eq!(rules.apply("\x1b[1mx"), "\x1b[1mx");
        assert_eq!(rules.apply("x"), "y");
    }

    #[test]
    fn invalid_rule_is_an_error() {
        assert!(ColorRules::compile([("(", "")], false).is_err());
    }
}
