//! Live quote snapshot + historical OHLCV series, with a deterministic
//! hash-seeded synthetic fallback when a live history source is unavailable.

use crate::fetcher::{FetchOpts, Fetcher};
use crate::models::{LiveQuote, MarketBar};
use chrono::{NaiveDate, Utc};
use scraper::{Html, Selector};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

const LIVE_QUOTE_URL: &str = "https://www.casablanca-bourse.com/bourseweb/negociation-seance.aspx";
const HISTORY_URL: &str = "https://www.casablanca-bourse.com/bourseweb/Negociation-Historique.aspx";

fn parse_french_number(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace('\u{a0}', " ").replace(' ', "").replace(',', ".");
    cleaned.parse::<f64>().ok()
}

fn fallback_live_quote() -> Vec<LiveQuote> {
    vec![LiveQuote {
        symbol: "MASI".to_string(),
        last: 13_500.0,
        change_pct: 0.05,
        volume: 1_000_000.0,
        as_of: Utc::now(),
    }]
}

/// Parses either the per-instrument table (`Instrument, Cours, Cours Veille,
/// Variation, Volume, Quantité`) or the index-level table (`Valeur, Veille,
/// Variation%`). Falls back to a single stable MASI snapshot on any failure.
pub fn fetch_live(html: &str) -> Vec<LiveQuote> {
    let doc = Html::parse_document(html);
    let Ok(table_sel) = Selector::parse("table") else {
        return fallback_live_quote();
    };
    let Ok(row_sel) = Selector::parse("tr") else {
        return fallback_live_quote();
    };
    let Ok(cell_sel) = Selector::parse("td,th") else {
        return fallback_live_quote();
    };

    let mut quotes = Vec::new();

    for table in doc.select(&table_sel) {
        let rows: Vec<_> = table.select(&row_sel).collect();
        if rows.is_empty() {
            continue;
        }
        let header_cells: Vec<String> = rows[0]
            .select(&cell_sel)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        let is_instrument_table = header_cells.iter().any(|h| h.eq_ignore_ascii_case("Instrument"));

        for row in rows.iter().skip(1) {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if cells.len() < 3 {
                continue;
            }
            if is_instrument_table && cells.len() >= 5 {
                let symbol = cells[0].clone();
                let last = parse_french_number(&cells[1]);
                let change_pct = parse_french_number(&cells[3]);
                let volume = parse_french_number(&cells[4]);
                if let (Some(last), Some(change_pct), Some(volume)) = (last, change_pct, volume) {
                    quotes.push(LiveQuote {
                        symbol,
                        last,
                        change_pct,
                        volume,
                        as_of: Utc::now(),
                    });
                }
            } else if cells.len() >= 3 {
                let symbol = cells[0].clone();
                let last = parse_french_number(&cells[1]);
                let change_pct = parse_french_number(&cells[2]);
                if let (Some(last), Some(change_pct)) = (last, change_pct) {
                    quotes.push(LiveQuote {
                        symbol,
                        last,
                        change_pct,
                        volume: 0.0,
                        as_of: Utc::now(),
                    });
                }
            }
        }
    }

    if quotes.is_empty() {
        fallback_live_quote()
    } else {
        quotes
    }
}

fn date_hash(seed: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic hash-seeded daily walk, mirroring the original's
/// `hash(str(date))`-driven synthesis: a `[-1%, +1%]` daily return, a small
/// open/high/low perturbation per date+suffix, and a plausible volume band.
fn synthetic_bar(date: NaiveDate, base_price: f64) -> MarketBar {
    let date_str = date.format("%Y-%m-%d").to_string();

    let daily_change = ((date_hash(&date_str) % 200) as f64 - 100.0) / 100.0 / 100.0;
    let price = base_price * (1.0 + daily_change);

    let open_jitter = ((date_hash(&format!("{date_str}open")) % 20) as f64 - 10.0) / 1000.0;
    let open = price * (1.0 + open_jitter);

    let high_jitter = (date_hash(&format!("{date_str}high")) % 50) as f64 / 10000.0;
    let high = open.max(price) * (1.0 + high_jitter);

    let low_jitter = (date_hash(&format!("{date_str}low")) % 30) as f64 / 10000.0;
    let low = open.min(price) * (1.0 - low_jitter);

    let close = price;
    let volume = 800_000.0 + (date_hash(&date_str) % 400_000) as f64;

    MarketBar::new(date, open, high, low, close, volume)
        .expect("synthetic bar always satisfies the OHLC invariant by construction")
}

/// Returns exactly `days` bars ending today, sorted ascending.
pub fn synthetic_history(days: i64, start_price: f64) -> Vec<MarketBar> {
    let today = Utc::now().date_naive();
    let start_date = today - chrono::Duration::days(days - 1);

    let mut bars = Vec::with_capacity(days as usize);
    let mut base_price = start_price;
    let mut date = start_date;
    while date <= today {
        let bar = synthetic_bar(date, base_price);
        base_price = bar.close;
        bars.push(bar);
        date += chrono::Duration::days(1);
    }
    bars
}

/// Parses a date-indexed OHLCV table (`Date, Ouverture, Plus Haut, Plus Bas,
/// Clôture, Volume`), French-number-aware. Returns `None` on any structural
/// failure so the caller can fall back to synthesis rather than persisting a
/// malformed partial series.
fn parse_history_table(html: &str) -> Option<Vec<MarketBar>> {
    let doc = Html::parse_document(html);
    let table_sel = Selector::parse("table").ok()?;
    let row_sel = Selector::parse("tr").ok()?;
    let cell_sel = Selector::parse("td,th").ok()?;

    let mut bars = Vec::new();
    for table in doc.select(&table_sel) {
        let rows: Vec<_> = table.select(&row_sel).collect();
        for row in rows.iter().skip(1) {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if cells.len() < 6 {
                continue;
            }
            let date = NaiveDate::parse_from_str(&cells[0], "%d/%m/%Y").ok();
            let open = parse_french_number(&cells[1]);
            let high = parse_french_number(&cells[2]);
            let low = parse_french_number(&cells[3]);
            let close = parse_french_number(&cells[4]);
            let volume = parse_french_number(&cells[5]);
            if let (Some(date), Some(open), Some(high), Some(low), Some(close), Some(volume)) =
                (date, open, high, low, close, volume)
            {
                if let Ok(bar) = MarketBar::new(date, open, high, low, close, volume) {
                    bars.push(bar);
                }
            }
        }
    }
    if bars.is_empty() {
        None
    } else {
        bars.sort_by_key(|b| b.date);
        Some(bars)
    }
}

/// Network-backed market data access: live quotes and historical series,
/// degrading to the deterministic synthesis above whenever the live source
/// is unreachable or its markup doesn't parse cleanly. Synthesis is
/// acceptable here because downstream components consume only the series
/// *shape*, not exact values (§4.4).
pub struct MarketDataService {
    fetcher: Arc<Fetcher>,
}

impl MarketDataService {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        MarketDataService { fetcher }
    }

    pub async fn fetch_live(&self) -> Vec<LiveQuote> {
        match self.fetcher.fetch(LIVE_QUOTE_URL, &FetchOpts::default()).await {
            Ok(result) => fetch_live(&result.body),
            Err(e) => {
                warn!("live quote fetch failed, using fallback snapshot: {e}");
                fallback_live_quote()
            }
        }
    }

    /// Returns exactly `days` bars ending today, sorted ascending, preferring
    /// the live source and falling back to synthetic history on any failure
    /// (unreachable source, parse failure, or a live series shorter than
    /// `days`).
    pub async fn fetch_history(&self, days: i64, start_price: f64) -> Vec<MarketBar> {
        let live = match self.fetcher.fetch(HISTORY_URL, &FetchOpts::default()).await {
            Ok(result) => parse_history_table(&result.body),
            Err(e) => {
                warn!("history fetch failed, synthesizing: {e}");
                None
            }
        };

        match live {
            Some(bars) if bars.len() as i64 >= days => {
                let start = bars.len() - days as usize;
                bars[start..].to_vec()
            }
            _ => synthetic_history(days, start_price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_history_returns_exact_count_ascending_with_valid_ohlc() {
        let bars = synthetic_history(252, 13_500.0);
        assert_eq!(bars.len(), 252);
        for pair in bars.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
        for bar in &bars {
            assert!(bar.low <= bar.open && bar.low <= bar.close);
            assert!(bar.high >= bar.open && bar.high >= bar.close);
            assert!(bar.volume >= 800_000.0 && bar.volume < 1_200_000.0);
        }
    }

    #[test]
    fn synthetic_history_is_deterministic() {
        let a = synthetic_history(30, 10_000.0);
        let b = synthetic_history(30, 10_000.0);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.close, y.close);
        }
    }

    #[test]
    fn french_number_parsing_handles_thousands_separator() {
        assert_eq!(parse_french_number("1 234,56"), Some(1234.56));
        assert_eq!(parse_french_number("13500,0"), Some(13500.0));
    }

    #[test]
    fn fetch_live_falls_back_on_unparseable_markup() {
        let quotes = fetch_live("<html><body>no tables here</body></html>");
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "MASI");
    }

    #[test]
    fn history_table_parses_french_dates_and_numbers() {
        let html = r#"
            <table>
                <tr><th>Date</th><th>Ouverture</th><th>Plus Haut</th><th>Plus Bas</th><th>Clôture</th><th>Volume</th></tr>
                <tr><td>02/01/2026</td><td>13 400,00</td><td>13 450,50</td><td>13 380,00</td><td>13 420,00</td><td>950 000</td></tr>
                <tr><td>01/01/2026</td><td>13 300,00</td><td>13 410,00</td><td>13 290,00</td><td>13 400,00</td><td>1 000 000</td></tr>
            </table>
        "#;
        let bars = parse_history_table(html).expect("table should parse");
        assert_eq!(bars.len(), 2);
        assert!(bars[0].date < bars[1].date);
        assert_eq!(bars[1].close, 13420.0);
    }

    #[test]
    fn history_table_returns_none_on_unparseable_markup() {
        assert!(parse_history_table("<html><body>no tables</body></html>").is_none());
    }
}
