use shannon_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("shannon doctor");
    println!("==============\n");

    let mut all_passed = true;

    // 1. Config file
    check_config_file(config_path, &mut all_passed);

    // 2. Config validation
    check_config_validation(config, &mut all_passed);

    // 3. State directory
    check_state_dir(config, &mut all_passed);

    // 4. LLM providers
    check_llm_providers(config, &mut all_passed);

    // 5. LLM provider connectivity
    check_llm_connectivity(config, &mut all_passed).await;

    // Summary
    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

/// Verifies `config.state_dir` exists (creating it if missing) and is
/// writable. This is where the event log, task store, session store and
/// schedule store all persist their JSONL files.
fn check_state_dir(config: &Config, all_passed: &mut bool) {
    let path = &config.state_dir;
    if !path.exists() {
        let _ = std::fs::create_dir_all(path);
    }
    let exists = path.exists();
    let writable = if exists {
        let probe = path.join(".shannon_doctor_probe");
        let w = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        w
    } else {
        false
    };

    let ok = exists && writable;
    let detail = match (exists, writable) {
        (true, true) => format!("{} (writable)", path.display()),
        (true, false) => format!("{} (not writable)", path.display()),
        _ => format!("{} (does not exist)", path.display()),
    };

    print_check("State directory", ok, detail);

    if !ok {
        *all_passed = false;
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    let count = config.llm.providers.len();
    let ok = count > 0;

    print_check(
        "LLM providers configured",
        ok,
        if ok {
            format!("{count} provider(s)")
        } else {
            "none configured".into()
        },
    );

    if !ok {
        *all_passed = false;
    }
}

/// Best-effort reachability probe against each configured provider's
/// `base_url`. A provider being unreachable is a warning, not a hard
/// failure — `LlmStartupPolicy::AllowNone` means the gateway can still
/// start with a subset of providers up.
async fn check_llm_connectivity(config: &Config, all_passed: &mut bool) {
    if config.llm.providers.is_empty() {
        return;
    }

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            print_check("LLM provider connectivity", false, format!("client build failed: {e}"));
            return;
        }
    };

    let mut any_reachable = false;
    for provider in &config.llm.providers {
        let reachable = client.get(&provider.base_url).send().await.is_ok();
        any_reachable |= reachable;
        print_check(
            &format!("Provider `{}` reachable", provider.id),
            reachable,
            if reachable {
                provider.base_url.clone()
            } else {
                format!("{} (unreachable)", provider.base_url)
            },
        );
    }

    if !any_reachable {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
