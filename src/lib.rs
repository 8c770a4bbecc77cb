pub mod area;
pub mod cache;
pub mod config;
pub mod delta;
pub mod error;
pub mod fetch;
pub mod fusion;
pub mod here;
pub mod models;
pub mod parser;
pub mod partners;
pub mod precache;
pub mod schedule;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
