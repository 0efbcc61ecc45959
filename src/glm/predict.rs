//! The columns every prediction frame carries.

use crate::dataframe::{self, DataFrame, Item, Scalar};

/// The raw model output.
pub const PREDICT_SCORE: &str = "predict_score";
/// The prediction, for regressions identical to the score.
pub const PREDICT_RESULT: &str = "predict_result";
/// The task the prediction was made for.
pub const TASK_TYPE: &str = "type";
/// The task type of regressions.
pub const REGRESSION: &str = "regression";

/// Adds the result and task type columns to a frame holding [`PREDICT_SCORE`].
pub fn compute_predict_details(frame: &mut DataFrame) -> Result<(), dataframe::Error> {
    let score = frame.column(PREDICT_SCORE)?;
    frame.set(&[PREDICT_RESULT], Item::List(score))?;
    frame.set(&[TASK_TYPE], Item::Scalar(Scalar::from(REGRESSION)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn details_follow_the_score() -> Result<(), dataframe::Error> {
        let mut frame = DataFrame::builder(["a", "b"])
            .label("y", &array![1.0, 2.0])
            .build()?;
        frame.set(&[PREDICT_SCORE], Item::Tensor(array![[0.5], [1.5]]))?;
        compute_predict_details(&mut frame)?;
        assert_eq!(frame.column_f64(PREDICT_RESULT)?, array![0.5, 1.5]);
        assert_eq!(frame.column(TASK_TYPE)?, vec![Scalar::from(REGRESSION); 2]);
        let expected = vec![PREDICT_SCORE, PREDICT_RESULT, TASK_TYPE];
        assert_eq!(frame.columns(), expected);
        Ok(())
    }
}
