//! Checkpoint and resume walkthrough

use recon_pipeline::{
    list_available_checkpoints, quick_test_step, Cell, Context, EngineConfig,
    FileCheckpointStore, CheckpointedPipeline, Frame, FunctionStep, Pipeline, PipelineBuilder,
    PipelineResult, Scalar, StepError, StepOutput,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn statement() -> Frame {
    Frame::new(["bank", "request_amount", "handling_fee"])
        .with_row(vec![Cell::from("CUB"), Cell::Int(15000), Cell::Int(30)])
        .with_row(vec![Cell::from("CTBC"), Cell::Int(4200), Cell::Int(15)])
        .with_row(vec![Cell::from("CUB"), Cell::Int(800), Cell::Null])
}

fn build_pipeline() -> PipelineResult<Pipeline> {
    PipelineBuilder::new("installment_recon")
        .description("Load, filter and total a bank statement")
        .task_type("transform")
        .step(FunctionStep::new("load", |ctx: &mut Context| {
            ctx.set_variable("period", "202501");
            Ok(StepOutput::success("Statement loaded").with_metadata("rows", ctx.data().num_rows()))
        }))
        .step(FunctionStep::transform("drop_missing_fees", |ctx: &Context| {
            let data = ctx.data();
            let fee = data
                .column_index("handling_fee")
                .ok_or_else(|| StepError::new("handling_fee column missing"))?;
            let mut kept = Frame::new(data.columns.clone());
            for row in data.rows.iter().filter(|row| !row[fee].is_null()) {
                kept.push_row(row.clone());
            }
            Ok(kept)
        }))
        .step(FunctionStep::new("total", |ctx: &mut Context| {
            let total: i64 = ctx
                .data()
                .column("request_amount")
                .map(|cells| {
                    cells
                        .filter_map(|cell| match cell {
                            Cell::Int(v) => Some(*v),
                            _ => None,
                        })
                        .sum()
                })
                .unwrap_or(0);
            ctx.set_variable("request_total", total);
            Ok(StepOutput::success(format!("Total request amount {}", total)))
        }))
        .build()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let workdir = std::env::temp_dir().join("recon-pipeline-walkthrough");
    let config = EngineConfig::default().with_checkpoint_root(&workdir);

    println!("Running pipeline with checkpoints under {}\n", workdir.display());
    let mut pipeline = build_pipeline()?;
    let store = FileCheckpointStore::from_config(&config)?;
    let summary = CheckpointedPipeline::new(&mut pipeline, store)
        .with_resume_policy(config.resume_policy)
        .execute_with_checkpoint(
            Context::with_data(statement(), "CUB", "transform"),
            config.save_checkpoints,
            None,
        )?;
    println!("{}", summary.render());

    println!("Available checkpoints:");
    for info in list_available_checkpoints(&workdir, Some("CUB"))? {
        println!("  {} (after {}, shape {:?})", info.name, info.step, info.data_shape);
    }

    println!("\nRe-running the last step from the filtered data:");
    let rerun = quick_test_step(
        "CUB_transform_after_drop_missing_fees",
        "total",
        &mut pipeline,
        &workdir,
    )?;
    println!(
        "  request_total = {:?}",
        rerun.context.get_variable("request_total", Scalar::Null)
    );

    Ok(())
}
