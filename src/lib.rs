pub mod bias;
pub mod clarray;
pub mod corrfunc;
pub mod cosmology;
pub mod dynamics;
pub mod error;
pub mod fft;
pub mod fftlog;
pub mod field;
pub mod fog;
pub mod healpix;
pub mod initial;
pub mod integrate;
pub mod map;
pub mod models;
pub mod pipeline;
pub mod pmesh;
pub mod powerspectrum;
pub mod shotnoise;
pub mod sht;
pub mod skysim;
pub mod util;
