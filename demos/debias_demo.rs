//! Cluster a tiny resume table and split it into kept and removed sets.

use debias::pipeline::{JobConfig, Pipeline};
use debias::HashingEmbedder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    debias::logging::init();

    let topics = [
        ("INFORMATION-TECHNOLOGY", "python developer building sql data pipelines", 12),
        ("HEALTHCARE", "registered nurse providing patient care in hospital wards", 7),
        ("SALES", "sales manager growing client accounts and revenue", 6),
    ];

    let dir = tempfile::tempdir()?;
    let input = dir.path().join("resumes.csv");
    let mut writer = csv::Writer::from_path(&input)?;
    writer.write_record(["ID", "Resume_str", "Category"])?;
    let mut id = 0;
    for (category, text, count) in topics {
        for i in 0..count {
            writer.write_record([id.to_string(), format!("{text} year {i}"), category.to_string()])?;
            id += 1;
        }
    }
    writer.flush()?;

    let mut config = JobConfig::new("demo", dir.path().join("job"));
    config.text_column = "Resume_str".to_string();
    config.min_cluster_size = 4;

    let mut pipeline = Pipeline::new(config, Box::new(HashingEmbedder::new(256)?));
    let summary = pipeline.run(&input)?;

    println!("=== clusters ===");
    for (cluster, size) in &summary.clustering.cluster_sizes {
        println!("  cluster {cluster:<3} {size:>3} records");
    }
    println!("  noise       {:>3} records", summary.clustering.noise_count);

    println!("\n=== pruning ===");
    for c in &summary.partition.clusters {
        println!(
            "  cluster {}: {} of {} removed",
            c.cluster_id, c.removed, c.original_size
        );
    }
    println!(
        "\nkept {} / removed {} of {}",
        summary.partition.kept, summary.partition.removed, summary.n_records
    );
    println!("\n{}", summary.render_text());
    Ok(())
}
