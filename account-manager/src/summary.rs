//! Display columns derived from cached account data.
//!
//! Every column is a variant of [`Column`]; [`Column::value`] renders it for
//! one account. Accounts without data render data columns as `-`.

use crate::session::{Session, SessionState};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Ladder systems and their rung labels.
const LADDER: &[(&str, &str)] = &[
    ("Gali", "N16"),
    ("Wregoe ZE-B c28-2", "N15"),
    ("Wregoe OP-D b58-0", "N14"),
    ("Plaa Trua QL-B c27-0", "N13"),
    ("Plaa Trua WQ-C d13-0", "N12"),
    ("HD 107865", "N11"),
    ("HD 105548", "N10"),
    ("HD 104785", "N9"),
    ("HD 102000", "N8"),
    ("HD 102779", "N7"),
    ("HD 104392", "N6"),
    ("HIP 56843", "N5"),
    ("HIP 57478", "N4"),
    ("HIP 57784", "N3"),
    ("HD 104495", "N2"),
    ("HD 105341", "N1"),
    ("HIP 58832", "N0"),
];

const MISSING: &str = "-";

/// Read-only copy of what the display needs from a session.
#[derive(Debug, Clone)]
pub struct AccountView {
    pub identity: String,
    pub state: SessionState,
    pub auth_required: bool,
    pub auth_prompted: bool,
    pub authorization_uri: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub profile: Option<Value>,
    pub fleet_carrier: Option<Value>,
}

impl AccountView {
    pub fn from_session(session: &Session) -> Self {
        Self {
            identity: session.identity().to_string(),
            state: session.state(),
            auth_required: session.auth_required(),
            auth_prompted: session.auth_prompted(),
            authorization_uri: session.authorization_uri().map(str::to_string),
            last_refreshed_at: session.last_refreshed_at(),
            profile: session.profile().cloned(),
            fleet_carrier: session.fleet_carrier().cloned(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.state == SessionState::Authorized
    }

    fn profile_at(&self, pointer: &str) -> Option<&Value> {
        self.profile.as_ref()?.pointer(pointer)
    }

    fn carrier_at(&self, pointer: &str) -> Option<&Value> {
        self.fleet_carrier.as_ref()?.pointer(pointer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Nickname,
    Authorization,
    CommanderName,
    Credits,
    Station,
    System,
    CommanderLadder,
    CarrierCallsign,
    CarrierName,
    Fuel,
    Tonnage,
    CarrierBalance,
    CarrierSystem,
    CarrierLadder,
    GhostSells,
}

impl Column {
    /// All columns in display order.
    pub const ALL: [Column; 15] = [
        Column::Nickname,
        Column::Authorization,
        Column::CommanderName,
        Column::Credits,
        Column::Station,
        Column::System,
        Column::CommanderLadder,
        Column::CarrierCallsign,
        Column::CarrierName,
        Column::Fuel,
        Column::Tonnage,
        Column::CarrierBalance,
        Column::CarrierSystem,
        Column::CarrierLadder,
        Column::GhostSells,
    ];

    /// Stable machine-readable key.
    pub fn key(&self) -> &'static str {
        match self {
            Column::Nickname => "nickname",
            Column::Authorization => "authorization",
            Column::CommanderName => "commander_name",
            Column::Credits => "credits",
            Column::Station => "station",
            Column::System => "system",
            Column::CommanderLadder => "commander_ladder",
            Column::CarrierCallsign => "carrier_callsign",
            Column::CarrierName => "carrier_name",
            Column::Fuel => "fuel",
            Column::Tonnage => "tonnage",
            Column::CarrierBalance => "carrier_balance",
            Column::CarrierSystem => "carrier_system",
            Column::CarrierLadder => "carrier_ladder",
            Column::GhostSells => "ghost_sells",
        }
    }

    /// Column header as shown to the user.
    pub fn header(&self) -> &'static str {
        match self {
            Column::Nickname => "Nickname",
            Column::Authorization => "cAPI",
            Column::CommanderName | Column::CarrierName => "Name",
            Column::Credits | Column::CarrierBalance => "Balance",
            Column::Station => "Station",
            Column::System | Column::CarrierSystem => "System",
            Column::CommanderLadder | Column::CarrierLadder => "N#",
            Column::CarrierCallsign => "Callsign",
            Column::Fuel => "Fuel",
            Column::Tonnage => "Tonnage",
            Column::GhostSells => "Ghost Sells",
        }
    }

    /// Renders this column for one account.
    pub fn value(&self, view: &AccountView) -> String {
        let rendered = match self {
            Column::Nickname => return view.identity.clone(),
            Column::Authorization => {
                let indicator = if view.auth_required { "⚠️" } else { "✅" };
                return indicator.to_string();
            }
            Column::CommanderName => view.profile_at("/commander/name").map(plain),
            Column::Credits => view
                .profile_at("/commander/credits")
                .and_then(as_number)
                .map(format_thousands),
            Column::Station => view.profile_at("/ship/station/name").map(plain),
            Column::System => view.profile_at("/ship/starsystem/name").map(plain),
            Column::CommanderLadder => view
                .profile_at("/ship/starsystem/name")
                .and_then(Value::as_str)
                .map(|s| ladder_position(s).unwrap_or_default().to_string()),
            Column::CarrierCallsign => view.carrier_at("/name/callsign").map(plain),
            Column::CarrierName => view
                .carrier_at("/name/filteredVanityName")
                .and_then(Value::as_str)
                .map(|s| hex_decode(s).unwrap_or_else(|| s.to_string())),
            Column::Fuel => view.carrier_at("/fuel").map(plain),
            Column::Tonnage => view.fleet_carrier.as_ref().and_then(tonnage).map(format_thousands),
            Column::CarrierBalance => view
                .carrier_at("/balance")
                .and_then(as_number)
                .map(format_thousands),
            Column::CarrierSystem => view.carrier_at("/currentStarSystem").map(plain),
            Column::CarrierLadder => view
                .carrier_at("/currentStarSystem")
                .and_then(Value::as_str)
                .map(|s| ladder_position(s).unwrap_or_default().to_string()),
            Column::GhostSells => view.carrier_at("/orders/commodities/sales").map(ghost_sells),
        };
        rendered.unwrap_or_else(|| MISSING.to_string())
    }
}

/// Rung label for a ladder system.
pub fn ladder_position(system: &str) -> Option<&'static str> {
    LADDER
        .iter()
        .find(|(name, _)| *name == system)
        .map(|(_, rung)| *rung)
}

/// Total commander credits plus carrier balances over authorized accounts.
pub fn liquid_assets<'a>(views: impl IntoIterator<Item = &'a AccountView>) -> f64 {
    views
        .into_iter()
        .filter(|v| !v.auth_required)
        .map(|v| {
            let credits = v.profile_at("/commander/credits").and_then(as_number);
            let balance = v.carrier_at("/balance").and_then(as_number);
            credits.unwrap_or(0.0) + balance.unwrap_or(0.0)
        })
        .sum()
}

/// Formats a value rounded to an integer with `,` every three digits.
pub fn format_thousands(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());

    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => MISSING.to_string(),
        other => other.to_string(),
    }
}

/// Numbers arrive either as JSON numbers or numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn tonnage(carrier: &Value) -> Option<f64> {
    let for_sale = carrier.pointer("/capacity/cargoForSale").and_then(as_number)?;
    let not_for_sale = carrier.pointer("/capacity/cargoNotForSale").and_then(as_number)?;
    Some(for_sale + not_for_sale)
}

/// Vanity names arrive hex-encoded.
fn hex_decode(encoded: &str) -> Option<String> {
    hex::decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Sell orders with nothing left in stock.
fn ghost_sells(sales: &Value) -> String {
    let orders: Vec<String> = sales
        .as_array()
        .map(|sales| {
            sales
                .iter()
                .filter(|sale| sale.get("stock").and_then(as_number) == Some(0.0))
                .filter_map(|sale| sale.get("name").and_then(Value::as_str))
                .map(title_case)
                .collect()
        })
        .unwrap_or_default();

    if orders.is_empty() {
        "None".to_string()
    } else {
        orders.join(",")
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            out.push(c);
            word_start = true;
        }
    }
    out
}
