use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Debug;

/// extra candidates pulled from the HNSW walk before exact re-ranking
const RERANK_SLACK: usize = 8;

/// A dictionary (HnswMap wrapper) for fast point look-up
///
pub struct ColumnDict<T> {
    pub dict: instant_distance::HnswMap<VecPoint, T>,
    pub data_vec: Vec<VecPoint>,
    pub name2index: HashMap<T, usize>,
}

impl<T> ColumnDict<T>
where
    T: Clone + Eq + std::hash::Hash + Debug + Send + Sync,
{
    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    pub fn empty() -> Self {
        use instant_distance::Builder;
        Self {
            dict: Builder::default().build(vec![], vec![]),
            data_vec: vec![],
            name2index: HashMap::new(),
        }
    }

    /// Build a dictionary over the rows of `data` (points x dims)
    ///
    /// * `data` - each row is a point
    /// * `names` - one name per row
    ///
    pub fn from_rows(data: &nalgebra::DMatrix<f32>, names: Vec<T>) -> Self {
        let data_vec = data
            .row_iter()
            .map(|row| VecPoint {
                data: row.iter().cloned().collect(),
            })
            .collect::<Vec<_>>();
        Self::from_points(data_vec, names)
    }

    fn from_points(data_vec: Vec<VecPoint>, names: Vec<T>) -> Self {
        debug_assert!(
            data_vec.len() == names.len(),
            "Data and names must have the same length"
        );

        let mut name2index = HashMap::<T, usize>::new();
        names.iter().enumerate().for_each(|(j, x)| {
            name2index.insert(x.clone(), j);
        });

        use instant_distance::Builder;
        let dict = Builder::default().build(data_vec.clone(), names);

        ColumnDict {
            dict,
            data_vec,
            name2index,
        }
    }

    /// k-nearest neighbours of an arbitrary query point
    ///
    /// Candidates from the graph walk are re-ranked by exact
    /// distance; ties go to the point inserted first.
    ///
    /// returns `(names, distances)`
    pub fn search(&self, query: &VecPoint, knn: usize) -> (Vec<T>, Vec<f32>) {
        self.search_with(query, knn, &mut instant_distance::Search::default())
    }

    fn search_with(
        &self,
        query: &VecPoint,
        knn: usize,
        search: &mut instant_distance::Search,
    ) -> (Vec<T>, Vec<f32>) {
        use instant_distance::Point;

        let nquery = knn.min(self.data_vec.len());
        if nquery == 0 {
            return (vec![], vec![]);
        }

        let mut candidates = self
            .dict
            .search(query, search)
            .take(nquery + RERANK_SLACK)
            .filter_map(|item| {
                let index = *self.name2index.get(item.value)?;
                Some((query.distance(&self.data_vec[index]), index, item.value.clone()))
            })
            .collect::<Vec<_>>();

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(nquery);

        candidates
            .into_iter()
            .map(|(d, _, name)| (name, d))
            .unzip()
    }

    /// k-nearest neighbours of a stored point, excluding itself
    ///
    /// * `query_name` - the name of the stored point
    /// * `knn` - the number of neighbours to return
    ///
    pub fn search_others(&self, query_name: &T, knn: usize) -> anyhow::Result<(Vec<T>, Vec<f32>)> {
        let Some(&self_idx) = self.name2index.get(query_name) else {
            return Err(anyhow::anyhow!("name {:?} not found", query_name));
        };

        let query = &self.data_vec[self_idx];
        let (names, distances) = self.search(query, knn + 1);

        Ok(names
            .into_iter()
            .zip(distances)
            .filter(|(name, _)| name != query_name)
            .take(knn)
            .unzip())
    }

    /// Nearest stored point for every row of `queries`
    ///
    /// Queries run on a dedicated pool of `num_jobs` workers. Each
    /// query is answered independently, so the output does not
    /// depend on the number of workers.
    ///
    /// * `queries` - each row is a query point
    /// * `num_jobs` - number of worker threads
    ///
    pub fn nearest_rows(
        &self,
        queries: &nalgebra::DMatrix<f32>,
        num_jobs: usize,
    ) -> anyhow::Result<Vec<Option<(T, f32)>>> {
        let nquery = queries.nrows();
        let points = queries
            .row_iter()
            .map(|row| VecPoint {
                data: row.iter().cloned().collect(),
            })
            .collect::<Vec<_>>();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_jobs.max(1))
            .build()?;

        let ret = pool.install(|| {
            points
                .par_iter()
                .progress_count(nquery as u64)
                .map_init(instant_distance::Search::default, |search, q| {
                    let (names, distances) = self.search_with(q, 1, search);
                    names.into_iter().zip(distances).next()
                })
                .collect::<Vec<_>>()
        });

        Ok(ret)
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

impl VecPoint {
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn line_points() -> DMatrix<f32> {
        DMatrix::from_row_slice(5, 2, &[0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 10.0, 0.0])
    }

    #[test]
    fn test_search_others_skips_self() {
        let dict = ColumnDict::from_rows(&line_points(), (0..5).collect());
        let (names, distances) = dict.search_others(&2, 2).unwrap();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&2));
        assert!(names.contains(&1) && names.contains(&3));
        assert!(distances.iter().all(|&d| (d - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_search_ties_prefer_first_inserted() {
        let dict = ColumnDict::from_rows(&line_points(), (0..5).collect());
        let (names, _) = dict.search(&VecPoint::new(vec![0.5, 0.0]), 1);
        assert_eq!(names, vec![0]);
    }

    #[test]
    fn test_nearest_rows_independent_of_jobs() {
        let dict = ColumnDict::from_rows(&line_points(), (0..5).collect());
        let queries = DMatrix::from_row_slice(3, 2, &[0.2, 0.1, 2.9, -0.3, 8.0, 0.0]);

        let one = dict.nearest_rows(&queries, 1).unwrap();
        let four = dict.nearest_rows(&queries, 4).unwrap();

        let names = one.iter().map(|x| x.as_ref().map(|(n, _)| *n)).collect::<Vec<_>>();
        assert_eq!(names, vec![Some(0), Some(3), Some(4)]);
        assert_eq!(one, four);
    }

    #[test]
    fn test_empty_dict_returns_nothing() {
        let dict = ColumnDict::<usize>::empty();
        let (names, distances) = dict.search(&VecPoint::new(vec![0.0, 0.0]), 3);
        assert!(names.is_empty() && distances.is_empty());
        assert!(dict.is_empty());
    }
}
