pub mod blur;
pub mod face;
pub mod grouper;
pub mod lsh;
pub mod models;
pub mod quality;
pub mod similarity;
pub mod union_find;
