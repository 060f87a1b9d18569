mod geo_point;
mod post;

pub use geo_point::GeoPoint;
pub use post::Post;
