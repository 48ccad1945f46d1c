use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::config::model::{ComponentKind, StackConfig};
use crate::orchestrator::process::HandleSummary;

/// One line of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub name: String,
    pub endpoint: String,
    pub ok: bool,
    pub pid: Option<u32>,
}

/// Rows for every enabled component, in display order, plus one row per
/// registered application. Reflects configuration, not a fresh probe.
pub fn build_status(config: &StackConfig, running: &[HandleSummary]) -> Vec<StatusRow> {
    let pid_of = |name: &str| {
        running
            .iter()
            .find(|h| h.name == name)
            .and_then(|h| h.pid)
    };

    let mut rows = Vec::new();
    for kind in config.enabled_components() {
        let pid = pid_of(kind.name());
        rows.push(StatusRow {
            name: kind.name().to_string(),
            endpoint: config.endpoint(kind),
            ok: true,
            pid,
        });
        if kind == ComponentKind::L2 {
            rows.push(StatusRow {
                name: "l2 (ws)".to_string(),
                endpoint: config.l2_ws_endpoint(),
                ok: true,
                pid,
            });
        }
    }

    for app in running.iter().filter(|h| h.name.starts_with("app:")) {
        rows.push(StatusRow {
            name: app.name.clone(),
            endpoint: app
                .port
                .map(|p| format!("http://{}:{}", config.host, p))
                .unwrap_or_else(|| "-".to_string()),
            ok: true,
            pid: app.pid,
        });
    }
    rows
}

/// Render rows as an indented table.
pub fn render_status(rows: &[StatusRow], use_color: bool) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Component").set_alignment(CellAlignment::Left),
        Cell::new("Endpoint").set_alignment(CellAlignment::Left),
        Cell::new("PID").set_alignment(CellAlignment::Right),
        Cell::new("Status").set_alignment(CellAlignment::Center),
    ]);

    for row in rows {
        let status = match (row.ok, use_color) {
            (true, true) => format!("{} {}", "\u{25cf}".green(), "ok".green()),
            (false, true) => format!("{} {}", "\u{25cf}".red(), "down".red()),
            (true, false) => "\u{25cf} ok".to_string(),
            (false, false) => "\u{25cf} down".to_string(),
        };
        let pid = row
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&row.name),
            Cell::new(&row.endpoint),
            Cell::new(&pid).set_alignment(CellAlignment::Right),
            Cell::new(&status),
        ]);
    }

    table
        .to_string()
        .lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn print_status(config: &StackConfig, running: &[HandleSummary]) {
    let use_color = std::io::stdout().is_terminal();
    let rows = build_status(config, running);

    println!();
    if use_color {
        println!("  {} {}", "stackrig".bold(), config.root_dir.display().dimmed());
    } else {
        println!("  stackrig {}", config.root_dir.display());
    }
    println!();
    println!("{}", render_status(&rows, use_color));
    println!();
    println!("  Logs: {}", config.log_dir().display());
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
