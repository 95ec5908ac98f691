use std::process::ExitCode;

use agri_predict::adapter;
use agri_predict::predictor::PredictorKind;

fn main() -> ExitCode
{
    adapter::run_process(PredictorKind::Disease)
}
