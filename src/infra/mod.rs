pub mod arcgis;
pub mod memory;
