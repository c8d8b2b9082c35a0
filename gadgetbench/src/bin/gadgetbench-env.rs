
use std::io::ErrorKind;
use gadgetbench::GadgetEnv;

fn describe<T: ToString>(res: Result<T, ErrorKind>) -> String {
    match res {
        Ok(v) => v.to_string(),
        Err(ErrorKind::NotFound) => "<unavailable>".to_string(),
        Err(ErrorKind::PermissionDenied) => "<read error; are you root?>".to_string(),
        Err(e) => format!("<{:?}>", e),
    }
}

fn main() {
    let num_cores = GadgetEnv::online_cores();

    let isol = describe(GadgetEnv::sysfs_isolated());
    let nohz = describe(GadgetEnv::sysfs_nohz());
    let paranoid = describe(GadgetEnv::procfs_perf_event_paranoid());
    let user_access = match GadgetEnv::procfs_perf_user_access() {
        Ok(true) => "enabled".to_string(),
        Ok(false) => "disabled [!!]".to_string(),
        Err(e) => describe::<bool>(Err(e)),
    };

    println!("[*] 'gadgetbench' environment summary:");
    match num_cores {
        Some(n) => println!("  {:<40}: {}", "online cores", n),
        None => println!("  {:<40}: {}", "online cores", "<unknown>"),
    }
    println!("  {:<40}: {}", "isolated cores", isol);
    println!("  {:<40}: {}", "nohz_full cores", nohz);
    for core in 0..num_cores.unwrap_or(0) {
        let gov = describe(GadgetEnv::sysfs_cpufreq_governor(core));
        let flag = match gov.as_str() {
            "performance" => "",
            _ => " [!!]",
        };
        println!("  {:<40}: {}{}",
            format!("cpufreq scaling (cpu{})", core), gov, flag
        );
    }
    println!("  {:<40}: {}", "kernel.perf_event_paranoid", paranoid);
    println!("  {:<40}: {}", "kernel.perf_user_access", user_access);
}
