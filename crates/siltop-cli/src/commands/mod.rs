pub mod info;
pub mod inspect;
pub mod monitor;
pub mod snapshot;

use siltop_core::SocInfo;

/// "N" for a known count, "?" otherwise.
pub fn count_or_unknown(count: Option<usize>) -> String {
    count.map_or_else(|| "?".to_string(), |n| n.to_string())
}

/// One-line chip summary, e.g. "Apple M2 Max (4E+8P+38GPU)".
pub fn soc_summary(soc: &SocInfo) -> String {
    format!(
        "{} ({}E+{}P+{}GPU)",
        soc.name,
        count_or_unknown(soc.e_core_count),
        count_or_unknown(soc.p_core_count),
        count_or_unknown(soc.gpu_core_count),
    )
}

/// Pretty-print a value as JSON on stdout, or exit 1.
pub fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: failed to serialize output: {e}");
            std::process::exit(1);
        }
    }
}
