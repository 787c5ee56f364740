use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

const GLOBAL_KEYS: &[(&str, &str)] = &[
    ("q / Ctrl-C", "Quit (cancels a running export)"),
    ("e", "Start export with the current filters"),
    ("x", "Cancel the running export"),
    ("y", "Copy last saved file path to clipboard"),
    ("a", "Toggle auto-save to history"),
    ("tab", "Switch tabs"),
    ("?", "Show this help"),
];

const HISTORY_KEYS: &[(&str, &str)] = &[
    ("↑/↓ or j/k", "Navigate"),
    ("r", "Refresh history"),
    ("d", "Delete selected entry"),
];

fn key_line(key: &'static str, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(desc),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![Line::from("Keybinds:")];
    lines.extend(GLOBAL_KEYS.iter().map(|(k, d)| key_line(k, d)));
    lines.push(Line::from(""));
    lines.push(Line::from("History tab:"));
    lines.extend(HISTORY_KEYS.iter().map(|(k, d)| key_line(k, d)));
    lines.push(Line::from(""));
    lines.push(Line::from(
        "Listings above the sync threshold run as a background job; progress is polled every interval.",
    ));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
