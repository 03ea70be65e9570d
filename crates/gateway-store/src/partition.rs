//! Range partitioning of the append-only logs table.
//!
//! Log rows are keyed by a monotonically increasing id. The table is split into
//! a fixed number of equally sized id ranges plus one overflow partition that
//! absorbs growth beyond the last range.

use std::fmt::Write;

pub const LOGS_TABLE_PARTITIONS_NUM: u64 = 100;
pub const LOGS_TABLE_PARTITION_RANGE_SIZE: u64 = 20_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Range(u64),
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPartitionPlan {
    partitions: u64,
    range_size: u64,
}

impl Default for LogPartitionPlan {
    fn default() -> Self {
        Self::new(LOGS_TABLE_PARTITIONS_NUM, LOGS_TABLE_PARTITION_RANGE_SIZE)
    }
}

impl LogPartitionPlan {
    pub fn new(partitions: u64, range_size: u64) -> Self {
        Self {
            partitions,
            range_size: range_size.max(1),
        }
    }

    pub fn partition_for(&self, id: u64) -> Partition {
        let index = id / self.range_size;
        if index < self.partitions {
            Partition::Range(index)
        } else {
            Partition::Overflow
        }
    }

    /// Exclusive upper id bound of a partition, `None` for the overflow.
    pub fn upper_bound(&self, partition: Partition) -> Option<u64> {
        match partition {
            Partition::Range(index) => (index + 1).checked_mul(self.range_size),
            Partition::Overflow => None,
        }
    }

    pub fn partition_name(&self, table: &str, partition: Partition) -> String {
        match partition {
            Partition::Range(index) => format!("{table}{index}"),
            Partition::Overflow => format!("{table}ow"),
        }
    }

    /// `ALTER TABLE` statement creating the partitions on a relational backend.
    pub fn ddl(&self, table: &str) -> String {
        let mut sql = format!("ALTER TABLE {table} PARTITION BY RANGE (id)(\n");
        for index in 0..self.partitions {
            let partition = Partition::Range(index);
            let bound = self.upper_bound(partition).unwrap_or(u64::MAX);
            let _ = writeln!(
                sql,
                "PARTITION {} VALUES LESS THAN ({bound}),",
                self.partition_name(table, partition)
            );
        }
        let _ = write!(
            sql,
            "PARTITION {} VALUES LESS THAN MAXVALUE);",
            self.partition_name(table, Partition::Overflow)
        );
        sql
    }
}
