//! TUI rendering.
//!
//! ┌ siltop  Apple M2 Max (4E+8P+38GPU)   thermal: Nominal   #42 ──────┐
//! ├ Processor ──────────────────────────────────────────────────────────┤
//! │ [E-CPU 45% @ 2064 MHz        ] [P-CPU 12% @ 3204 MHz            ] │
//! │ [GPU 30% @ 1398 MHz          ] [ANE 0% @ 0.0 W                  ] │
//! ├ Memory ─────────────────────────────────────────────────────────────┤
//! │ [RAM 24.0/32.0 GB  swap 1.0/4.0 GB                                ] │
//! ├ Power ──────────────────────────────────────────────────────────────┤
//! │  CPU  8.2 W (27%)  avg 6.1 W  peak 14.0 W   GPU ...                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!   q: quit

use super::app::{App, DashboardState};
use ratatui::{prelude::*, widgets::*};
use siltop_core::{ClusterUsage, MetricsSnapshot, PowerHistory, PowerReading};

use crate::commands::soc_summary;

pub fn draw(f: &mut Frame, app: &App) {
    let core_rows = if app.config().show_cores {
        core_rows_needed(app.state().latest())
    } else {
        0
    };

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),             // title
            Constraint::Length(8 + core_rows), // processor
            Constraint::Length(3),             // memory
            Constraint::Min(6),                // power
            Constraint::Length(1),             // keys
        ])
        .split(f.area());

    draw_title(f, rows[0], app);
    draw_processor(f, rows[1], app);
    draw_memory(f, rows[2], app);
    draw_power(f, rows[3], app);
    draw_keys(f, rows[4]);
}

fn draw_title(f: &mut Frame, area: Rect, app: &App) {
    let accent = app.config().theme_color();
    let state = app.state();

    let thermal = state
        .latest()
        .map(|s| s.thermal_pressure.to_string())
        .unwrap_or_else(|| "—".into());
    let thermal_style = match state.latest() {
        Some(s) if !s.thermal_pressure.is_nominal() => Style::default().bold().fg(Color::Red),
        _ => Style::default().fg(Color::DarkGray),
    };

    let mut spans = vec![
        Span::styled(" siltop ", Style::default().bold().fg(accent)),
        Span::raw(format!(" {} ", soc_summary(app.soc()))),
        Span::styled(format!("  thermal: {thermal} "), thermal_style),
        Span::styled(
            format!("  #{} ", state.readings()),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    let (fallbacks, misses) = app.reader_stats();
    if let Some(health) = reader_health(fallbacks, misses) {
        spans.push(Span::styled(health, Style::default().fg(Color::DarkGray)));
    }
    if let Some(reason) = state.no_data() {
        spans.push(Span::styled(
            format!(" no data: {reason} "),
            Style::default().bold().fg(Color::Yellow),
        ));
    }
    if !app.sampler_alive() {
        spans.push(Span::styled(
            " sampler stopped ",
            Style::default().bold().fg(Color::Red),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(accent))
        .title(Line::from(spans));
    let hint = if state.latest().is_none() {
        "Waiting for the first powermetrics sample..."
    } else if app.soc().capability.is_default() {
        "Chip not recognised: percentages use approximate ceilings"
    } else {
        ""
    };
    let p = Paragraph::new(hint)
        .style(Style::default().fg(Color::DarkGray))
        .block(block);
    f.render_widget(p, area);
}

/// Polls served from a partially written file, shown only once any occurred.
fn reader_health(fallbacks: u64, misses: u64) -> Option<String> {
    (fallbacks > 0 || misses > 0).then(|| format!("  partial reads {fallbacks}, missed {misses} "))
}

fn draw_processor(f: &mut Frame, area: Rect, app: &App) {
    let accent = app.config().theme_color();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(accent))
        .title(" Processor ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(snap) = app.state().latest() else {
        return;
    };

    let core_rows = if app.config().show_cores {
        core_rows_needed(Some(snap))
    } else {
        0
    };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(core_rows),
            Constraint::Length(3),
        ])
        .split(inner);

    let halves = |r: Rect| {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(r)
    };

    let top = halves(rows[0]);
    match snap.cpu.e_cluster {
        Some(e) => f.render_widget(
            gauge(
                format!("E-CPU {}% @ {} MHz", e.active_percent, e.freq_mhz),
                e.active_percent,
                accent,
            ),
            top[0],
        ),
        None => f.render_widget(gauge("E-CPU —".into(), 0, accent), top[0]),
    }
    match snap.cpu.p_cluster {
        Some(p) => f.render_widget(
            gauge(
                format!("P-CPU {}% @ {} MHz", p.active_percent, p.freq_mhz),
                p.active_percent,
                accent,
            ),
            top[1],
        ),
        None => f.render_widget(gauge("P-CPU —".into(), 0, accent), top[1]),
    }

    if core_rows > 0 {
        draw_cores(f, rows[1], &snap.cpu.clusters, accent);
    }

    let bottom = halves(rows[2]);
    f.render_widget(
        gauge(
            format!(
                "GPU {}% @ {} MHz",
                snap.gpu.active_percent, snap.gpu.freq_mhz
            ),
            snap.gpu.active_percent,
            accent,
        ),
        bottom[0],
    );
    let ane = snap.cpu.ane_power;
    let ane_pct = ane.percent_of_ceiling.unwrap_or(0);
    f.render_widget(
        gauge(
            format!("ANE {ane_pct}% @ {:.1} W", ane.watts),
            ane_pct,
            accent,
        ),
        bottom[1],
    );
}

/// Two core gauges per row, each three lines tall, capped at twenty rows.
fn core_rows_needed(snap: Option<&MetricsSnapshot>) -> u16 {
    let cores: usize = snap
        .map(|s| s.cpu.clusters.iter().map(|c| c.cores.len()).sum())
        .unwrap_or(0);
    (cores.div_ceil(2) * 3).min(60) as u16
}

fn draw_cores(f: &mut Frame, area: Rect, clusters: &[ClusterUsage], accent: Color) {
    let gauges: Vec<Gauge> = clusters
        .iter()
        .flat_map(|cluster| {
            let prefix: String = cluster.name.chars().take(1).collect();
            cluster.cores.iter().map(move |core| {
                gauge(
                    format!(
                        "{prefix}{} {}% @ {} MHz",
                        core.cpu, core.active_percent, core.freq_mhz
                    ),
                    core.active_percent,
                    accent,
                )
            })
        })
        .collect();

    let row_count = gauges.len().div_ceil(2);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Length(3); row_count])
        .split(area);
    for (i, g) in gauges.into_iter().enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(rows[i / 2]);
        f.render_widget(g, cols[i % 2]);
    }
}

fn draw_memory(f: &mut Frame, area: Rect, app: &App) {
    let accent = app.config().theme_color();
    let g = match app.state().memory() {
        Some(m) => {
            let swap = match m.swap_used_percent {
                Some(_) => format!("  swap {:.1}/{:.1} GB", m.swap_used_gb, m.swap_total_gb),
                None => "  swap inactive".to_string(),
            };
            gauge(
                format!(
                    "RAM {}%  {:.1}/{:.1} GB{swap}",
                    m.used_percent, m.used_gb, m.total_gb
                ),
                m.used_percent,
                accent,
            )
        }
        None => gauge("RAM —".into(), 0, accent),
    };
    f.render_widget(g, area);
}

fn draw_power(f: &mut Frame, area: Rect, app: &App) {
    let accent = app.config().theme_color();
    let state = app.state();

    let mut lines = Vec::new();
    if let Some(snap) = state.latest() {
        lines.extend(power_lines(state, snap));
        if let Some(bw) = &snap.bandwidth {
            lines.push(Line::from(""));
            lines.push(Line::from(vec![
                Span::styled(" Memory bandwidth ", Style::default().bold()),
                Span::raw(format!(
                    "CPU {:.1} GB/s ({})   GPU {:.1} GB/s ({})",
                    bw.cpu_gbs,
                    percent_label(bw.cpu_percent_of_ceiling),
                    bw.gpu_gbs,
                    percent_label(bw.gpu_percent_of_ceiling),
                )),
            ]));
        }
    }

    let cap = &app.soc().capability;
    let title = format!(
        " Power  (ceilings: CPU {:.0} W, GPU {:.0} W, avg over {}s) ",
        cap.cpu_max_power_w,
        cap.gpu_max_power_w,
        state.power().cpu.window().as_secs()
    );
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(accent))
        .title(title);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn power_lines(state: &DashboardState, snap: &MetricsSnapshot) -> Vec<Line<'static>> {
    let power = state.power();
    let mut lines = vec![
        power_line("CPU", Some(snap.cpu.power), &power.cpu),
        power_line("GPU", Some(snap.gpu.power), &power.gpu),
        power_line("ANE", Some(snap.cpu.ane_power), &power.ane),
    ];
    lines.push(power_line("Package", None, &power.package));
    lines
}

fn power_line(label: &str, reading: Option<PowerReading>, history: &PowerHistory) -> Line<'static> {
    let watts = reading
        .map(|r| r.watts)
        .or(history.latest())
        .unwrap_or(0.0);
    let pct = reading
        .and_then(|r| r.percent_of_ceiling)
        .map(|p| format!(" ({p}%)"))
        .unwrap_or_default();
    Line::from(vec![
        Span::styled(format!(" {label:<8}"), Style::default().bold()),
        Span::raw(format!("{watts:>6.2} W{pct:<7}")),
        Span::styled(
            format!(
                "  avg {}  peak {}",
                watts_label(history.average()),
                watts_label(history.peak())
            ),
            Style::default().fg(Color::DarkGray),
        ),
    ])
}

fn draw_keys(f: &mut Frame, area: Rect) {
    let bar = Paragraph::new(" q / Esc / Ctrl-C: quit")
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(bar, area);
}

fn gauge(label: String, percent: u8, color: Color) -> Gauge<'static> {
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(label))
        .gauge_style(Style::default().fg(color))
        .percent(u16::from(percent.min(100)))
        .label("")
}

fn watts_label(w: Option<f64>) -> String {
    w.map_or_else(|| "—".to_string(), |w| format!("{w:.2} W"))
}

fn percent_label(p: Option<u8>) -> String {
    p.map_or_else(|| "—".to_string(), |p| format!("{p}%"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn labels() {
        assert_eq!(watts_label(Some(3.14159)), "3.14 W");
        assert_eq!(watts_label(None), "—");
        assert_eq!(reader_health(0, 0), None);
        assert_eq!(
            reader_health(3, 1).as_deref(),
            Some("  partial reads 3, missed 1 ")
        );
        assert_eq!(percent_label(Some(42)), "42%");
        assert_eq!(percent_label(None), "—");
    }

    #[test]
    fn no_snapshot_needs_no_core_rows() {
        assert_eq!(core_rows_needed(None), 0);
    }

    #[test]
    fn power_line_includes_ceiling_and_history() {
        let mut h = PowerHistory::new(Duration::from_secs(30));
        h.push(UNIX_EPOCH, 4.0);
        h.push(UNIX_EPOCH + Duration::from_secs(1), 8.0);
        let reading = PowerReading {
            watts: 8.0,
            percent_of_ceiling: Some(27),
        };
        let text: String = power_line("CPU", Some(reading), &h)
            .spans
            .iter()
            .map(|s| s.content.as_ref())
            .collect();
        assert!(text.contains("8.00 W (27%)"), "{text}");
        assert!(text.contains("avg 6.00 W"), "{text}");
        assert!(text.contains("peak 8.00 W"), "{text}");
    }
}
