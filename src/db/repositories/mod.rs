mod results;
mod snapshots;
