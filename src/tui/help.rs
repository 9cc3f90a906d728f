use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key_line(keys: &[&str], pad: usize, desc: &str) -> Line<'static> {
    let mut spans = vec![Span::raw("  ")];
    let mut width = 0;
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" / "));
            width += 3;
        }
        spans.push(Span::styled(
            k.to_string(),
            Style::default().fg(Color::Magenta),
        ));
        width += k.chars().count();
    }
    spans.push(Span::raw(" ".repeat(pad.saturating_sub(width).max(1))));
    spans.push(Span::raw(desc.to_string()));
    Line::from(spans)
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Launcher:"),
        key_line(&["←↑↓→", "hjkl"], 14, "Move between tiles"),
        key_line(&["Enter"], 14, "Launch selected tile"),
        key_line(&["1-9"], 14, "Launch tile by number"),
        Line::from(""),
        Line::from("While an app is open:"),
        key_line(&["Esc", "b"], 14, "Back to launcher"),
        key_line(&["x"], 14, "Close the app"),
        Line::from(""),
        key_line(&["?"], 14, "Toggle this help"),
        key_line(&["q", "Ctrl-C", "Ctrl-Q"], 14, "Quit"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
