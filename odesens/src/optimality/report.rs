use super::Criterion;
use nalgebra::DMatrix;
use std::fmt::Display;

/// Values of every [Criterion] for one fisher-information matrix, `None` where the criterion
/// is undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaReport {
    values: Vec<(Criterion, Option<f64>)>,
}

impl CriteriaReport {
    /// Evaluates every criterion.
    pub fn new(fim: &DMatrix<f64>) -> Self {
        let values = Criterion::ALL
            .iter()
            .map(|c| (*c, c.evaluate(fim).ok()))
            .collect();
        Self { values }
    }

    /// Value of a single criterion.
    pub fn get(&self, criterion: Criterion) -> Option<f64> {
        self.values
            .iter()
            .find(|(c, _)| *c == criterion)
            .and_then(|(_, v)| *v)
    }
}

impl Display for CriteriaReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows: String = self
            .values
            .iter()
            .map(|(c, v)| {
                let value = match v {
                    Some(v) => format!("{v:>+.6e}"),
                    None => "singular".to_string(),
                };
                format!("{:<6}\t{value}", c.name())
            })
            .collect::<Vec<String>>()
            .join("\n");
        write!(f, "{:-^1$}\nCriterion\tValue\n{rows}", " Criteria ", 28)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;

    #[test]
    fn singular_entries() -> Result<()> {
        let report = CriteriaReport::new(&DMatrix::zeros(2, 2));
        assert_eq!(report.get(Criterion::A), None);
        assert_eq!(report.get(Criterion::ModA), Some(0.));
        let table = report.to_string();
        assert!(table.starts_with("--------- Criteria ---------"));
        assert!(table.contains("modE  \tsingular"));
        Ok(())
    }
}
