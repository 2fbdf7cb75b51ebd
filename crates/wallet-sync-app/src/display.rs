// Text rendering of UI updates for the terminal.

use crate::protocol::{BridgeStatus, UiUpdate};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

const FRACTION_DIGITS: u32 = 5;

/// Format a lamport amount as SOL, rounded half-up to at most five fraction
/// digits with trailing zeros dropped, grouped in thousands: `1,234.5 ◎`.
pub fn format_sol(lamports: u64) -> String {
    let step = u128::from(LAMPORTS_PER_SOL / 10u64.pow(FRACTION_DIGITS));
    let scale = 10u128.pow(FRACTION_DIGITS);
    let rounded = (u128::from(lamports) + step / 2) / step;

    let whole = group_thousands(rounded / scale);
    let fraction = format!("{:0width$}", rounded % scale, width = FRACTION_DIGITS as usize);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        format!("{whole} ◎")
    } else {
        format!("{whole}.{fraction} ◎")
    }
}

fn group_thousands(n: u128) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn render(update: &UiUpdate) -> String {
    match update {
        UiUpdate::Chain(chain) => format!("cluster: {} ({})", chain.display_name(), chain.id()),
        UiUpdate::Selection(Some(candidate)) => {
            format!("account: {} ({})", candidate.address, candidate.group)
        }
        UiUpdate::Selection(None) => "account: none".to_string(),
        UiUpdate::Balance {
            address,
            slot,
            lamports,
        } => format!("balance: {} for {address} at slot {slot}", format_sol(*lamports)),
        UiUpdate::BalanceError { address, message } => {
            format!("balance unavailable for {address}: {message}")
        }
        UiUpdate::Bridge(BridgeStatus::Connected) => "wallet bridge connected".to_string(),
        UiUpdate::Bridge(BridgeStatus::Disconnected) => "wallet bridge disconnected".to_string(),
    }
}
