use std::collections::HashMap;
use std::sync::LazyLock;

use parcelwatch_core::config::RoutesConfig;
use tracing::warn;

/// Built-in directional travel estimates in hours: (origin, destination, hours).
///
/// Keys are canonical city names as produced by [`canonical_city`].
const BUILTIN_ROUTES: &[(&str, &str, u32)] = &[
    // Bogotá hub
    ("BOGOTA", "MEDELLIN", 10),
    ("MEDELLIN", "BOGOTA", 10),
    ("BOGOTA", "CALI", 10),
    ("CALI", "BOGOTA", 10),
    ("BOGOTA", "BARRANQUILLA", 18),
    ("BARRANQUILLA", "BOGOTA", 18),
    ("BOGOTA", "BUCARAMANGA", 8),
    ("BUCARAMANGA", "BOGOTA", 8),
    // Medellín hub
    ("MEDELLIN", "BARRANQUILLA", 16),
    ("BARRANQUILLA", "MEDELLIN", 16),
    ("MEDELLIN", "CALI", 8),
    ("CALI", "MEDELLIN", 8),
    ("MEDELLIN", "PEREIRA", 5),
    ("PEREIRA", "MEDELLIN", 5),
    ("MEDELLIN", "SINCELEJO", 12),
    ("SINCELEJO", "MEDELLIN", 12),
    ("MEDELLIN", "CARTAGENA", 14),
    ("CARTAGENA", "MEDELLIN", 14),
    ("MEDELLIN", "CAUCASIA", 8),
    ("CAUCASIA", "MEDELLIN", 8),
    ("MEDELLIN", "PLANETA RICA", 10),
    ("PLANETA RICA", "MEDELLIN", 10),
    ("MEDELLIN", "MAICAO", 22),
    ("MAICAO", "MEDELLIN", 22),
    ("MEDELLIN", "SAHAGUN", 10),
    ("SAHAGUN", "MEDELLIN", 10),
    ("MEDELLIN", "TOLU", 11),
    ("TOLU", "MEDELLIN", 11),
    ("MEDELLIN", "QUIBDO", 11),
    ("QUIBDO", "MEDELLIN", 11),
    // Barranquilla hub
    ("BARRANQUILLA", "SINCELEJO", 4),
    ("SINCELEJO", "BARRANQUILLA", 4),
    ("BARRANQUILLA", "CALI", 20),
    ("CALI", "BARRANQUILLA", 20),
    ("BARRANQUILLA", "CAUCASIA", 8),
    ("CAUCASIA", "BARRANQUILLA", 8),
    ("BARRANQUILLA", "PLANETA RICA", 6),
    ("PLANETA RICA", "BARRANQUILLA", 6),
    ("BARRANQUILLA", "MAICAO", 7),
    ("MAICAO", "BARRANQUILLA", 7),
    ("BARRANQUILLA", "LA APARTADA", 7),
    ("LA APARTADA", "BARRANQUILLA", 7),
    ("BARRANQUILLA", "SANTA MARTA", 3),
    ("SANTA MARTA", "BARRANQUILLA", 3),
    ("BARRANQUILLA", "RIOHACHA", 5),
    ("RIOHACHA", "BARRANQUILLA", 5),
    ("BARRANQUILLA", "YARUMAL", 13),
    ("YARUMAL", "BARRANQUILLA", 13),
    ("BARRANQUILLA", "SAHAGUN", 7),
    ("SAHAGUN", "BARRANQUILLA", 7),
    // Coast: Caucasia
    ("CAUCASIA", "SINCELEJO", 4),
    ("SINCELEJO", "CAUCASIA", 4),
    ("CAUCASIA", "SANTA MARTA", 11),
    ("SANTA MARTA", "CAUCASIA", 11),
    ("CAUCASIA", "MAICAO", 15),
    ("MAICAO", "CAUCASIA", 15),
    ("CAUCASIA", "PLANETA RICA", 2),
    ("PLANETA RICA", "CAUCASIA", 2),
    // Coast: Santa Marta
    ("SANTA MARTA", "SINCELEJO", 7),
    ("SINCELEJO", "SANTA MARTA", 7),
    ("SANTA MARTA", "PLANETA RICA", 7),
    ("PLANETA RICA", "SANTA MARTA", 7),
    ("SANTA MARTA", "MAICAO", 4),
    ("MAICAO", "SANTA MARTA", 4),
];

/// Lowercase spelling and accent variants → canonical uppercase name.
static CITY_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("medellin", "MEDELLIN"),
        ("medellín", "MEDELLIN"),
        ("barranquilla", "BARRANQUILLA"),
        ("bogota", "BOGOTA"),
        ("bogotá", "BOGOTA"),
        ("bogota d.c.", "BOGOTA"),
        ("cali", "CALI"),
        ("sincelejo", "SINCELEJO"),
        ("bucaramanga", "BUCARAMANGA"),
        ("pereira", "PEREIRA"),
        ("cartagena", "CARTAGENA"),
        ("maicao", "MAICAO"),
        ("caucasia", "CAUCASIA"),
        ("planeta rica", "PLANETA RICA"),
        ("planetarica", "PLANETA RICA"),
        ("la apartada", "LA APARTADA"),
        ("apartada", "LA APARTADA"),
        ("santa marta", "SANTA MARTA"),
        ("santamarta", "SANTA MARTA"),
        ("riohacha", "RIOHACHA"),
        ("yarumal", "YARUMAL"),
        ("sahagun", "SAHAGUN"),
        ("sahagún", "SAHAGUN"),
        ("tolu", "TOLU"),
        ("tolú", "TOLU"),
        ("quibdo", "QUIBDO"),
        ("quibdó", "QUIBDO"),
    ])
});

/// Normalize a provider city name to its canonical uppercase form.
///
/// `"Medellín (Antioquia)"` → `"MEDELLIN"`. Unknown names are trimmed,
/// whitespace-collapsed and uppercased. Empty input yields `""`.
pub fn canonical_city(raw: &str) -> String {
    let name = strip_qualifier(raw);
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = collapsed.to_lowercase();
    match CITY_ALIASES.get(lower.as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => collapsed.to_uppercase(),
    }
}

/// Drop a trailing `"(…)"` region annotation, if any.
fn strip_qualifier(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.ends_with(')') {
        if let Some(open) = trimmed.rfind('(') {
            return trimmed[..open].trim_end();
        }
    }
    trimmed
}

/// Directional route-time lookup with a default for unknown pairs.
///
/// Immutable after construction, so a single table can be shared across
/// threads and consulted concurrently.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<(String, String), u32>,
    default_hours: u32,
}

impl RouteTable {
    /// The built-in table with the given default for unknown routes.
    pub fn builtin(default_hours: u32) -> Self {
        let routes = BUILTIN_ROUTES
            .iter()
            .map(|(o, d, h)| ((o.to_string(), d.to_string()), *h))
            .collect();
        Self {
            routes,
            default_hours,
        }
    }

    /// An empty table; every lookup misses.
    pub fn empty(default_hours: u32) -> Self {
        Self {
            routes: HashMap::new(),
            default_hours,
        }
    }

    /// Built-in table plus the configured extra entries.
    pub fn from_config(config: &RoutesConfig) -> Self {
        let mut table = Self::builtin(config.default_hours);
        for entry in &config.extra {
            table.insert(&entry.origin, &entry.destination, entry.hours);
        }
        table
    }

    /// Add or replace one directional entry. Names are normalized first.
    pub fn insert(&mut self, origin: &str, destination: &str, hours: u32) {
        self.routes
            .insert((canonical_city(origin), canonical_city(destination)), hours);
    }

    /// Exact lookup after normalization; `None` on a miss.
    pub fn lookup(&self, origin: &str, destination: &str) -> Option<u32> {
        self.routes
            .get(&(canonical_city(origin), canonical_city(destination)))
            .copied()
    }

    /// Estimated travel time in hours. Never fails: unknown pairs get the
    /// default and a warning so gaps in coverage show up in the logs.
    pub fn resolve_travel_hours(&self, origin: &str, destination: &str) -> u32 {
        let from = canonical_city(origin);
        let to = canonical_city(destination);
        match self.routes.get(&(from.clone(), to.clone())) {
            Some(hours) => *hours,
            None => {
                warn!(
                    origin = %from,
                    destination = %to,
                    default_hours = self.default_hours,
                    "unknown route, using default travel time"
                );
                self.default_hours
            }
        }
    }

    pub fn default_hours(&self) -> u32 {
        self.default_hours
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builtin(parcelwatch_core::config::DEFAULT_ROUTE_HOURS)
    }
}
