use rstar::{RTree, primitives::GeomWithData};

use crate::prelude::*;

pub type IndexedQuery<const D: usize> = RTree<GeomWithData<[f64; D], usize>>;
pub type PointQuery = IndexedQuery<3>;

pub fn create_query<const D: usize>(coords: &[[f64; D]]) -> IndexedQuery<D>
where
    [f64; D]: rstar::Point<Scalar = f64>,
{
    RTree::bulk_load(
        coords
            .iter()
            .copied()
            .enumerate()
            .map(|(id, c)| GeomWithData::new(c, id))
            .collect::<Vec<_>>(),
    )
}

pub fn create_point_query(points: &[Point]) -> PointQuery {
    create_query(&points.iter().map(|&p| p.into()).collect::<Vec<[f64; 3]>>())
}

pub fn search_radius<const D: usize>(
    query: &IndexedQuery<D>,
    center: [f64; D],
    sqr_radius: f64,
) -> impl Iterator<Item = usize> + '_
where
    [f64; D]: rstar::Point<Scalar = f64>,
{
    query
        .locate_within_distance(center, sqr_radius)
        .map(|n| n.data)
}
