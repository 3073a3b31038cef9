//! Terminal output for the inspection commands
//!
//! Renders entitlements, session history and renewal info either as JSON or
//! as comfy-table tables.

use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use rolecall_core::models::EntitlementSnapshot;
use rolecall_core::{RenewalInfo, SessionHistory};

// ============================================================================
// Formatters
// ============================================================================

/// Format a user's entitlements (human or JSON)
pub fn format_entitlements(snapshot: &EntitlementSnapshot, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string());
    }

    let usage = &snapshot.usage;
    let status = match snapshot.lock_reason {
        None => "available".to_string(),
        Some(reason) => format!("locked: {}", reason),
    };

    let mut lines = vec![];
    lines.push(format!("Status:           {}", status));
    lines.push(format!(
        "Remaining today:  {}",
        format_limit(usage.daily_seconds_remaining)
    ));
    lines.push(format!(
        "Daily limit:      {}",
        format_limit(snapshot.daily_seconds_limit)
    ));
    if let Some(quota) = snapshot.org_daily_seconds_quota {
        lines.push(format!("Org daily pool:   {}", format_seconds(quota)));
    }
    if let Some(cap) = snapshot.per_user_daily_seconds_cap {
        lines.push(format!("Per-user cap:     {}", format_seconds(cap)));
    }
    lines.push(format!(
        "Bonus:            {}",
        format_seconds(snapshot.manual_bonus_seconds)
    ));
    lines.push(String::new());

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    set_header(&mut table, &["Bucket", "Key", "Raw", "Billed"], no_color);
    table.add_row(Row::from(vec![
        "Today".to_string(),
        usage.day_key.clone(),
        format_seconds(usage.raw_seconds_today),
        format_seconds(usage.billed_seconds_today),
    ]));
    table.add_row(Row::from(vec![
        "Month".to_string(),
        usage.month_key.clone(),
        format_seconds(usage.raw_seconds_this_month),
        format_seconds(usage.billed_seconds_this_month),
    ]));
    lines.push(table.to_string());
    lines.push(String::new());

    lines.push(format!("Timezone:         {}", usage.timezone_used));
    lines.push(format!("Daily reset:      {}", usage.next_daily_reset_label));
    lines.push(format!(
        "Next renewal:     {}",
        usage.next_renewal_at.format("%Y-%m-%d %H:%M UTC")
    ));
    lines.push(format!(
        "Billing unit:     {}s",
        snapshot.billing_increment_seconds
    ));

    lines.join("\n")
}

/// Format a user's billed sessions (human or JSON)
pub fn format_history(history: &SessionHistory, limit: usize, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(history).unwrap_or_else(|_| "{}".to_string());
    }

    if history.sessions.is_empty() {
        return "No sessions recorded.".to_string();
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    set_header(&mut table, &["Session", "Ended", "Raw", "Billed"], no_color);

    for session in history.sessions.iter().take(limit) {
        let id_short = &session.session_id[..8.min(session.session_id.len())];
        table.add_row(Row::from(vec![
            id_short.to_string(),
            session.ended_at.format("%Y-%m-%d %H:%M").to_string(),
            format_seconds(session.raw_seconds),
            format_seconds(session.billed_seconds),
        ]));
    }

    let mut out = table.to_string();
    if history.sessions.len() > limit {
        out.push_str(&format!(
            "\n({} of {} sessions shown)",
            limit,
            history.sessions.len()
        ));
    }
    out.push_str(&format!(
        "\nTotal billed:     {}",
        format_seconds(history.total_billed_seconds)
    ));
    out
}

/// Format a user's billing period (human or JSON)
pub fn format_renewal(renewal: &RenewalInfo, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(renewal).unwrap_or_else(|_| "{}".to_string());
    }

    let fmt = "%Y-%m-%d %H:%M UTC";
    [
        format!("User:             {}", renewal.user_id),
        format!("Period:           {:?}", renewal.period),
        format!("Started:          {}", renewal.period_start_at.format(fmt)),
        format!("Ends:             {}", renewal.period_end_at.format(fmt)),
        format!("Next renewal:     {}", renewal.next_renewal_at.format(fmt)),
    ]
    .join("\n")
}

// ============================================================================
// Utilities
// ============================================================================

fn set_header(table: &mut Table, columns: &[&str], no_color: bool) {
    if no_color {
        table.set_header(columns.to_vec());
    } else {
        table.set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
}

/// `1h 05m`, `12m 30s`, `45s`
fn format_seconds(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

fn format_limit(seconds: Option<i64>) -> String {
    seconds
        .map(format_seconds)
        .unwrap_or_else(|| "unlimited".to_string())
}

// ============================================================================
// Tests
// ============================================================================
