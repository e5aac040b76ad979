//! `siltop info`: detected chip and its rated ceilings.

use siltop_core::detect_soc_info;

use super::{count_or_unknown, print_json};

pub fn run(json: bool) {
    let soc = detect_soc_info();
    if json {
        print_json(&soc);
        return;
    }

    let cap = &soc.capability;
    println!("Chip:        {}", soc.name);
    println!("CPU cores:   {}", count_or_unknown(soc.core_count));
    println!("  E-cores:   {}", count_or_unknown(soc.e_core_count));
    println!("  P-cores:   {}", count_or_unknown(soc.p_core_count));
    println!("GPU cores:   {}", count_or_unknown(soc.gpu_core_count));
    println!();
    println!("Rated ceilings ({})", cap.chip_name);
    println!("  CPU power: {:>6.1} W", cap.cpu_max_power_w);
    println!("  GPU power: {:>6.1} W", cap.gpu_max_power_w);
    println!("  CPU bw:    {:>6.1} GB/s", cap.cpu_max_bw_gbs);
    println!("  GPU bw:    {:>6.1} GB/s", cap.gpu_max_bw_gbs);
    if cap.is_default() {
        println!();
        println!("Chip not in the capability table; percentages are approximate.");
    }
}
