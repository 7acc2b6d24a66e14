use llm_latency_bench::{load_scenario_from_file, print_summary, publish_results, run_scenario};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Needs VLLM_BASE_URL and VLLM_API_KEY in the environment
    let scenario = load_scenario_from_file("scenarios/vllm_streaming.yaml")?;

    println!("Running scenario: {}", scenario.name);
    if let Some(desc) = &scenario.description {
        println!("Description: {}", desc);
    }

    let summary = run_scenario(&scenario, true).await?;
    print_summary(&summary)?;

    let outcome = publish_results(&scenario, &summary);
    for path in &outcome.artifacts {
        println!("CDF data: {}", path.display());
    }

    Ok(())
}
