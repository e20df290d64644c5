use std::{env, fs, process};

use document_forensics::{
    AnalysisConfig, ForensicsEngine, RasterImage,
    analysis::template::TemplateInput,
    error::Result,
    report::{JsonReport, write_artifacts},
};

fn main() -> Result<()> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let Some(document_path) = args.first() else {
        eprintln!("usage: verify_document <document> [reference] [config.json]");
        process::exit(2);
    };

    let config = match args.get(2) {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::default(),
    };
    let engine = ForensicsEngine::new(config)?;

    let document = RasterImage::decode(&fs::read(document_path)?)?;
    let template = match args.get(1) {
        Some(path) => Some(TemplateInput::locate(image::open(path)?)),
        None => None,
    };

    let report = engine.run(&document, template.as_ref())?;
    println!("{}", JsonReport::from(&report).to_json()?);

    let paths = write_artifacts(&report, &document, "output")?;
    println!("Report: {}", paths.report.display());
    if let Some(overlay) = paths.overlay {
        println!("Overlay: {}", overlay.display());
    }

    Ok(())
}
