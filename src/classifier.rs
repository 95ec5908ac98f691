use anyhow::{anyhow, bail, ensure};
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::StandardScaler;

/// Marks a leaf in `children_left` / `children_right`.
pub const TREE_LEAF: i64 = -1;

/// A fitted classifier that maps rows of features to class identifiers.
pub trait Classifier
{
    /// Number of input features the model was fit on, when known.
    fn n_features(&self) -> Option<usize>;

    /// Predicts one class per row of `features`.
    fn predict(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array1<i64>>;
}

/// The classifier families the pretrained bundles are exported as.
/// Estimators mirror the fitted attributes of their scikit-learn counterparts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierModel
{
    DecisionTree(DecisionTree),
    #[serde(alias = "extra_trees")]
    RandomForest(RandomForest),
    LogisticRegression(LogisticRegression),
    Pipeline(Pipeline),
    Stacking(Stacking),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTree
{
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Per-node class weights (counts or fractions), shape (n_nodes, n_classes).
    pub value: Vec<Vec<f64>>,
    pub classes: Vec<i64>,
    #[serde(default)]
    pub n_features_in: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RandomForest
{
    pub estimators: Vec<DecisionTree>,
    pub classes: Vec<i64>,
    #[serde(default)]
    pub n_features_in: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MultiClass
{
    #[default]
    Multinomial,
    Ovr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticRegression
{
    /// Shape (1, n_features) for binary problems, (n_classes, n_features) otherwise.
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    pub classes: Vec<i64>,
    #[serde(default)]
    pub multi_class: MultiClass,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline
{
    pub scaler: StandardScaler,
    pub model: Box<ClassifierModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stacking
{
    pub estimators: Vec<ClassifierModel>,
    pub final_estimator: Box<ClassifierModel>,
    pub classes: Vec<i64>,
    #[serde(default)]
    pub passthrough: bool,
}

fn check_feature_count(expected: Option<usize>, features: &ArrayView2<'_, f64>, model: &str) -> anyhow::Result<()>
{
    if let Some(expected) = expected
    {
        let actual = features.len_of(Axis(1));
        ensure!(actual == expected, "X has {} features, but {} is expecting {} features as input.", actual, model, expected);
    }
    Ok(())
}

/// Index of the first maximum of each row.
fn argmax_rows(probabilities: &Array2<f64>) -> Vec<usize>
{
    probabilities.outer_iter()
        .map(|row| {
            row.iter().enumerate().fold((0, f64::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best }).0
        })
        .collect()
}

fn sigmoid(x: f64) -> f64
{
    1.0 / (1.0 + (-x).exp())
}

impl DecisionTree
{
    pub fn n_nodes(&self) -> usize
    {
        self.children_left.len()
    }

    pub fn validate(&self) -> anyhow::Result<()>
    {
        let n_nodes = self.n_nodes();
        ensure!(n_nodes > 0, "decision tree has no nodes");
        ensure!(
            self.children_right.len() == n_nodes && self.feature.len() == n_nodes
                && self.threshold.len() == n_nodes && self.value.len() == n_nodes,
            "decision tree node arrays have inconsistent lengths");
        ensure!(!self.classes.is_empty(), "decision tree has no classes");

        for node in 0..n_nodes
        {
            ensure!(self.value[node].len() == self.classes.len(),
                "node {} has {} class weights for {} classes", node, self.value[node].len(), self.classes.len());

            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == TREE_LEAF
            {
                continue;
            }
            for child in [left, right]
            {
                ensure!(child > node as i64 && (child as usize) < n_nodes, "node {} has invalid child {}", node, child);
            }
            let feature = self.feature[node];
            ensure!(feature >= 0, "split node {} has invalid feature {}", node, feature);
            if let Some(n_features) = self.n_features_in
            {
                ensure!((feature as usize) < n_features, "split node {} uses feature {} of {}", node, feature, n_features);
            }
        }
        Ok(())
    }

    fn leaf(&self, row: ArrayView1<'_, f64>) -> anyhow::Result<usize>
    {
        let mut node = 0;
        while self.children_left[node] != TREE_LEAF
        {
            let feature = self.feature[node] as usize;
            let value = *row.get(feature).ok_or_else(|| anyhow!("feature index {} is out of range", feature))?;
            // Trees are fit on single-precision inputs; compare the same way.
            node = if (value as f32) as f64 <= self.threshold[node]
            {
                self.children_left[node] as usize
            }
            else
            {
                self.children_right[node] as usize
            };
        }
        Ok(node)
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        check_feature_count(self.n_features_in, &features, "DecisionTreeClassifier")?;
        let n_classes = self.classes.len();
        let mut probabilities = Array2::<f64>::zeros((features.nrows(), n_classes));
        for (row, mut out) in features.outer_iter().zip(probabilities.outer_iter_mut())
        {
            let weights = &self.value[self.leaf(row)?];
            let total: f64 = weights.iter().sum();
            let normalizer = if total == 0.0 { 1.0 } else { total };
            for (o, w) in out.iter_mut().zip(weights)
            {
                *o = w / normalizer;
            }
        }
        Ok(probabilities)
    }
}

impl RandomForest
{
    pub fn validate(&self) -> anyhow::Result<()>
    {
        ensure!(!self.estimators.is_empty(), "random forest has no estimators");
        for (i, tree) in self.estimators.iter().enumerate()
        {
            tree.validate().map_err(|e| anyhow!("estimator {}: {}", i, e))?;
            ensure!(tree.classes.len() == self.classes.len(),
                "estimator {} has {} classes, the forest has {}", i, tree.classes.len(), self.classes.len());
        }
        Ok(())
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        check_feature_count(self.n_features_in, &features, "RandomForestClassifier")?;
        let per_tree = self.estimators
            .par_iter()
            .map(|tree| tree.predict_proba(features))
            .collect::<anyhow::Result<Vec<Array2<f64>>>>()?;

        let mut mean = Array2::<f64>::zeros((features.nrows(), self.classes.len()));
        for probabilities in &per_tree
        {
            mean += probabilities;
        }
        Ok(mean / self.estimators.len() as f64)
    }
}

impl LogisticRegression
{
    pub fn n_features(&self) -> Option<usize>
    {
        self.coef.first().map(Vec::len)
    }

    pub fn validate(&self) -> anyhow::Result<()>
    {
        let n_features = self.n_features().ok_or_else(|| anyhow!("logistic regression has no coefficients"))?;
        ensure!(self.coef.iter().all(|row| row.len() == n_features), "coefficient rows have inconsistent lengths");
        ensure!(self.intercept.len() == self.coef.len(), "{} intercepts for {} coefficient rows", self.intercept.len(), self.coef.len());
        ensure!(self.classes.len() >= 2, "logistic regression needs at least two classes");
        let expected_rows = if self.classes.len() == 2 { 1 } else { self.classes.len() };
        ensure!(self.coef.len() == expected_rows,
            "{} coefficient rows for {} classes", self.coef.len(), self.classes.len());
        Ok(())
    }

    pub fn decision_function(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        check_feature_count(self.n_features(), &features, "LogisticRegression")?;
        let rows = self.coef.len();
        let cols = self.n_features().unwrap_or(0);
        let coef = Array2::from_shape_vec((rows, cols), self.coef.concat())?;
        let intercept = Array1::from(self.intercept.clone());
        Ok(features.dot(&coef.t()) + &intercept)
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        let decision = self.decision_function(features)?;

        if self.coef.len() == 1
        {
            let positive = decision.column(0).mapv(sigmoid);
            let negative = positive.mapv(|p| 1.0 - p);
            return Ok(ndarray::stack(Axis(1), &[negative.view(), positive.view()])?);
        }

        let mut probabilities = match self.multi_class
        {
            MultiClass::Multinomial => {
                let max = decision.map_axis(Axis(1), |row| row.fold(f64::NEG_INFINITY, |a, &b| a.max(b)));
                (decision - &max.insert_axis(Axis(1))).mapv(f64::exp)
            },
            MultiClass::Ovr => decision.mapv(sigmoid),
        };
        let sums = probabilities.sum_axis(Axis(1)).insert_axis(Axis(1));
        probabilities /= &sums;
        Ok(probabilities)
    }
}

impl Stacking
{
    pub fn validate(&self) -> anyhow::Result<()>
    {
        ensure!(!self.estimators.is_empty(), "stacking classifier has no base estimators");
        for estimator in &self.estimators
        {
            estimator.validate()?;
            ensure!(estimator.classes().len() == self.classes.len(),
                "base estimator has {} classes, the ensemble has {}", estimator.classes().len(), self.classes.len());
        }
        self.final_estimator.validate()?;
        ensure!(self.final_estimator.classes().len() == self.classes.len(),
            "final estimator has {} classes, the ensemble has {}", self.final_estimator.classes().len(), self.classes.len());
        Ok(())
    }

    /// Base-estimator probabilities, side by side. Binary problems keep only
    /// the positive-class column of each estimator.
    pub fn meta_features(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        let mut blocks = Vec::with_capacity(self.estimators.len() + 1);
        for estimator in &self.estimators
        {
            let probabilities = estimator.predict_proba(features)?;
            if self.classes.len() == 2
            {
                blocks.push(probabilities.slice(ndarray::s![.., 1..]).to_owned());
            }
            else
            {
                blocks.push(probabilities);
            }
        }
        if self.passthrough
        {
            blocks.push(features.to_owned());
        }

        let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
        Ok(concatenate(Axis(1), &views)?)
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        let meta = self.meta_features(features)?;
        self.final_estimator.predict_proba(meta.view())
    }
}

impl ClassifierModel
{
    pub fn classes(&self) -> &[i64]
    {
        match self
        {
            ClassifierModel::DecisionTree(m) => &m.classes,
            ClassifierModel::RandomForest(m) => &m.classes,
            ClassifierModel::LogisticRegression(m) => &m.classes,
            ClassifierModel::Pipeline(m) => m.model.classes(),
            ClassifierModel::Stacking(m) => &m.classes,
        }
    }

    /// Structural checks run once when the artifact is loaded.
    pub fn validate(&self) -> anyhow::Result<()>
    {
        match self
        {
            ClassifierModel::DecisionTree(m) => m.validate(),
            ClassifierModel::RandomForest(m) => m.validate(),
            ClassifierModel::LogisticRegression(m) => m.validate(),
            ClassifierModel::Pipeline(m) => {
                m.scaler.validate()?;
                if let (Some(scaler), Some(model)) = (m.scaler.n_features(), m.model.n_features())
                {
                    ensure!(scaler == model, "pipeline scaler expects {} features, its model {}", scaler, model);
                }
                m.model.validate()
            },
            ClassifierModel::Stacking(m) => m.validate(),
        }
    }

    pub fn predict_proba(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>>
    {
        match self
        {
            ClassifierModel::DecisionTree(m) => m.predict_proba(features),
            ClassifierModel::RandomForest(m) => m.predict_proba(features),
            ClassifierModel::LogisticRegression(m) => m.predict_proba(features),
            ClassifierModel::Pipeline(m) => {
                let scaled = m.scaler.transform(features)?;
                m.model.predict_proba(scaled.view())
            },
            ClassifierModel::Stacking(m) => m.predict_proba(features),
        }
    }
}

impl Classifier for ClassifierModel
{
    fn n_features(&self) -> Option<usize>
    {
        match self
        {
            ClassifierModel::DecisionTree(m) => m.n_features_in,
            ClassifierModel::RandomForest(m) => m.n_features_in.or_else(|| m.estimators.iter().find_map(|t| t.n_features_in)),
            ClassifierModel::LogisticRegression(m) => m.n_features(),
            ClassifierModel::Pipeline(m) => m.scaler.n_features().or_else(|| m.model.n_features()),
            ClassifierModel::Stacking(m) => m.estimators.iter().find_map(|e| e.n_features()),
        }
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> anyhow::Result<Array1<i64>>
    {
        if features.nrows() == 0
        {
            bail!("cannot predict on an empty feature matrix");
        }
        let probabilities = self.predict_proba(features)?;
        let classes = self.classes();
        argmax_rows(&probabilities)
            .into_iter()
            .map(|i| classes.get(i).copied().ok_or_else(|| anyhow!("class index {} out of range", i)))
            .collect()
    }
}

#[cfg(test)]
mod tests
{
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    /// x[0] <= 0.5 -> class 0 (3:1), otherwise class 1 (0:2).
    fn stump() -> DecisionTree
    {
        DecisionTree {
            children_left: vec![1, TREE_LEAF, TREE_LEAF],
            children_right: vec![2, TREE_LEAF, TREE_LEAF],
            feature: vec![0, -2, -2],
            threshold: vec![0.5, -2.0, -2.0],
            value: vec![vec![3.0, 3.0], vec![3.0, 1.0], vec![0.0, 2.0]],
            classes: vec![0, 1],
            n_features_in: Some(2),
        }
    }

    #[test]
    fn tree_routes_on_threshold()
    {
        let tree = stump();
        tree.validate().unwrap();
        let probabilities = tree.predict_proba(array![[0.2, 9.0], [0.5, 0.0], [0.7, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(probabilities, array![[0.75, 0.25], [0.75, 0.25], [0.0, 1.0]], epsilon = 1e-12);

        let model = ClassifierModel::DecisionTree(tree);
        assert_eq!(model.predict(array![[0.2, 0.0], [0.9, 0.0]].view()).unwrap(), array![0, 1]);
    }

    #[test]
    fn tree_compares_in_single_precision()
    {
        // 0.3 rounds up in single precision and lands above a threshold of exactly 0.3.
        let mut tree = stump();
        tree.threshold[0] = 0.3;
        let probabilities = tree.predict_proba(array![[0.3, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(probabilities, array![[0.0, 1.0]], epsilon = 1e-12);
    }

    #[test]
    fn tree_rejects_wrong_feature_count()
    {
        let error = stump().predict_proba(array![[0.1, 0.2, 0.3]].view()).unwrap_err();
        assert!(error.to_string().contains("expecting 2 features"));
    }

    #[test]
    fn tree_validation_rejects_bad_children()
    {
        let mut tree = stump();
        tree.children_left[0] = 7;
        assert!(tree.validate().is_err());
    }

    #[test]
    fn forest_averages_tree_probabilities()
    {
        let mut inverted = stump();
        inverted.value = vec![vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 0.0]];
        let forest = RandomForest { estimators: vec![stump(), inverted], classes: vec![3, 8], n_features_in: Some(2) };
        forest.validate().unwrap();

        let probabilities = forest.predict_proba(array![[0.0, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(probabilities, array![[0.375, 0.625]], epsilon = 1e-12);

        let model = ClassifierModel::RandomForest(forest);
        assert_eq!(model.predict(array![[0.0, 0.0]].view()).unwrap(), array![8]);
    }

    #[test]
    fn binary_logistic_regression_uses_sigmoid()
    {
        let model = LogisticRegression { coef: vec![vec![2.0]], intercept: vec![-1.0], classes: vec![0, 1], multi_class: MultiClass::Multinomial };
        model.validate().unwrap();
        let probabilities = model.predict_proba(array![[0.5]].view()).unwrap();
        assert_abs_diff_eq!(probabilities, array![[0.5, 0.5]], epsilon = 1e-12);
    }

    #[test]
    fn multinomial_logistic_regression_uses_softmax()
    {
        let model = LogisticRegression {
            coef: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]],
            intercept: vec![0.0, 0.0, 0.0],
            classes: vec![0, 1, 2],
            multi_class: MultiClass::Multinomial,
        };
        let probabilities = model.predict_proba(array![[(2.0f64).ln(), 0.0]].view()).unwrap();
        assert_abs_diff_eq!(probabilities, array![[0.5, 0.25, 0.25]], epsilon = 1e-12);
        assert_abs_diff_eq!(probabilities.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stacking_drops_negative_column_for_binary_problems()
    {
        let stacking = Stacking {
            estimators: vec![ClassifierModel::DecisionTree(stump())],
            final_estimator: Box::new(ClassifierModel::LogisticRegression(LogisticRegression {
                coef: vec![vec![10.0]],
                intercept: vec![-5.0],
                classes: vec![0, 1],
                multi_class: MultiClass::Multinomial,
            })),
            classes: vec![0, 1],
            passthrough: false,
        };
        stacking.validate().unwrap();

        let meta = stacking.meta_features(array![[0.9, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(meta, array![[1.0]], epsilon = 1e-12);

        let model = ClassifierModel::Stacking(stacking);
        assert_eq!(model.predict(array![[0.9, 0.0], [0.1, 0.0]].view()).unwrap(), array![1, 0]);
        assert_eq!(model.n_features(), Some(2));
    }

    #[test]
    fn stacking_passthrough_appends_raw_features()
    {
        let stacking = Stacking {
            estimators: vec![ClassifierModel::DecisionTree(stump())],
            final_estimator: Box::new(ClassifierModel::DecisionTree(stump())),
            classes: vec![0, 1],
            passthrough: true,
        };
        let meta = stacking.meta_features(array![[0.1, 4.0]].view()).unwrap();
        assert_abs_diff_eq!(meta, array![[0.25, 0.1, 4.0]], epsilon = 1e-12);
    }

    #[test]
    fn pipeline_scales_before_predicting()
    {
        let pipeline = ClassifierModel::Pipeline(Pipeline {
            scaler: StandardScaler { mean: Some(vec![10.0, 0.0]), scale: Some(vec![10.0, 1.0]) },
            model: Box::new(ClassifierModel::DecisionTree(stump())),
        });
        pipeline.validate().unwrap();
        // (14 - 10) / 10 = 0.4 goes left, (16 - 10) / 10 = 0.6 goes right.
        assert_eq!(pipeline.predict(array![[14.0, 0.0], [16.0, 0.0]].view()).unwrap(), array![0, 1]);
    }

    #[test]
    fn deserializes_tagged_models()
    {
        let json = r#"{
            "type": "stacking",
            "classes": [0, 1, 2],
            "estimators": [
                {"type": "extra_trees", "classes": [0, 1, 2], "estimators": [
                    {"children_left": [-1], "children_right": [-1], "feature": [-2], "threshold": [-2.0],
                     "value": [[0.2, 0.5, 0.3]], "classes": [0, 1, 2]}
                ]}
            ],
            "final_estimator": {"type": "logistic_regression", "coef": [[0, 0, 0], [0, 0, 0], [0, 0, 0]],
                                "intercept": [0, 1, 0], "classes": [0, 1, 2]}
        }"#;
        let model: ClassifierModel = serde_json::from_str(json).unwrap();
        model.validate().unwrap();
        assert_eq!(model.predict(array![[5.0, 5.0]].view()).unwrap(), array![1]);
    }
}
