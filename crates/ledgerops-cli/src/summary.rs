use ledgerops_db::{Applied, MigrationStatus};

const WIDTH: usize = 70;

/// Print the outcome of `migrate apply` / `migrate up`.
pub fn print_applied(target: &str, results: &[Applied]) {
    print!("{}", render_applied(target, results));
}

pub fn print_status(target: &str, report: &[MigrationStatus]) {
    print!("{}", render_status(target, report));
}

fn render_applied(target: &str, results: &[Applied]) -> String {
    let applied = results.iter().filter(|a| !a.skipped).count();
    let skipped = results.len() - applied;

    let rows: Vec<(String, String, &str)> = results
        .iter()
        .map(|a| {
            (
                a.identifier().to_string(),
                a.record.name.clone(),
                if a.skipped { "skipped" } else { "applied" },
            )
        })
        .collect();
    let footer = format!("{applied} applied, {skipped} already up to date");
    render_box(target, &rows, &footer)
}

fn render_status(target: &str, report: &[MigrationStatus]) -> String {
    let rows: Vec<(String, String, &str)> = report
        .iter()
        .map(|s| {
            let name = match s {
                MigrationStatus::Pending { name, .. } => name.clone(),
                MigrationStatus::Applied { record }
                | MigrationStatus::Drifted { record, .. }
                | MigrationStatus::Orphaned { record } => record.name.clone(),
            };
            (s.identifier().to_string(), name, s.label())
        })
        .collect();

    let pending = report
        .iter()
        .filter(|s| matches!(s, MigrationStatus::Pending { .. }))
        .count();
    let drifted = report
        .iter()
        .filter(|s| matches!(s, MigrationStatus::Drifted { .. }))
        .count();
    let footer = format!("{pending} pending, {drifted} drifted");
    render_box(target, &rows, &footer)
}

fn render_box(target: &str, rows: &[(String, String, &str)], footer: &str) -> String {
    let inner = WIDTH - 4; // "│ " + " │"
    let title = format!("ledgerops v{}", env!("CARGO_PKG_VERSION"));
    let title_dashes = WIDTH - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "

    let id_w = rows
        .iter()
        .map(|(id, _, _)| id.chars().count())
        .max()
        .unwrap_or(0)
        .max(2);
    let state_w = 8;
    let name_w = inner.saturating_sub(id_w + state_w + 4);

    let line = |text: &str| format!("│ {:<inner$} │\n", truncate(text, inner));

    let mut out = String::new();
    out.push_str(&format!("╭─── {title} {}╮\n", "─".repeat(title_dashes)));
    out.push_str(&line(&format!("Target  {target}")));
    out.push_str(&line(&"─".repeat(inner)));
    if rows.is_empty() {
        out.push_str(&line("no migrations"));
    }
    for (id, name, state) in rows {
        out.push_str(&line(&format!(
            "{id:<id_w$}  {:<name_w$}  {state:>state_w$}",
            truncate(name, name_w)
        )));
    }
    out.push_str(&line(&"─".repeat(inner)));
    out.push_str(&line(footer));
    out.push_str(&format!("╰{}╯\n", "─".repeat(WIDTH - 2)));
    out
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
