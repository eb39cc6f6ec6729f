//! MEMORY DOCTOR: human-readable diagnosis of the overhead report.

use super::stats::MemoryOverhead;

const MIB: usize = 1024 * 1024;

/// Inputs the doctor needs beyond the overhead report itself.
#[derive(Debug, Clone, Copy)]
pub struct DoctorContext {
    pub client_count: usize,
    pub replica_count: usize,
    pub cached_scripts: usize,
}

/// Synthesize the doctor report from the thresholds the engine
/// promises: peak > 1.5x current, total fragmentation > 1.4 over
/// 10 MiB, allocator ratios > 1.1 over 10 MiB, clients > 200 KiB each,
/// replicas > 10 MiB each, more than 1000 cached scripts.
pub fn report(overhead: &MemoryOverhead, ctx: &DoctorContext) -> String {
    if overhead.total_allocated < 5 * MIB {
        return "This instance is using very little memory; the issue detector needs a \
                populated dataset to say anything useful.\n"
            .to_string();
    }

    let mut findings: Vec<String> = Vec::new();

    if overhead.peak_allocated as f64 > overhead.total_allocated as f64 * 1.5 {
        findings.push(
            " * Peak memory: usage peaked at more than 150% of what is allocated now. \
             Allocators rarely return memory after a peak, so an inflated RSS is expected \
             and mostly harmless; MEMORY PURGE may reclaim some of it."
                .to_string(),
        );
    }
    if overhead.total_frag > 1.4 && overhead.total_frag_bytes > (10 * MIB) as i64 {
        findings.push(
            " * High total fragmentation: the resident set is much larger than the sum of \
             logical allocations. A past memory peak or an allocation pattern that \
             fragments the allocator are the usual causes."
                .to_string(),
        );
    }
    if overhead.allocator_frag > 1.1 && overhead.allocator_frag_bytes > (10 * MIB) as i64 {
        findings.push(
            " * High allocator fragmentation: the allocator holds substantially more \
             active memory than is allocated. Consider enabling active defragmentation."
                .to_string(),
        );
    }
    if overhead.allocator_rss > 1.1 && overhead.allocator_rss_bytes > (10 * MIB) as i64 {
        findings.push(
            " * High allocator RSS overhead: the allocator maps more resident memory than \
             it holds active. MEMORY PURGE may return some of it to the kernel."
                .to_string(),
        );
    }
    if overhead.rss_extra > 1.1 && overhead.rss_extra_bytes > (10 * MIB) as i64 {
        findings.push(
            " * High process RSS overhead: memory outside the allocator (modules, \
             scripting runtimes) dominates the resident set."
                .to_string(),
        );
    }
    if ctx.client_count > 0 && overhead.clients_normal / ctx.client_count > 200 * 1024 {
        findings.push(
            " * Big client buffers: output buffers average more than 200 KiB per client. \
             Slow readers or very large replies are piling data up in memory."
                .to_string(),
        );
    }
    if ctx.replica_count > 0 && overhead.clients_replicas > 10 * MIB {
        findings.push(
            " * Big replica buffers: replica output buffers exceed 10 MiB each on \
             average; some replica is not keeping up with the stream."
                .to_string(),
        );
    }
    if ctx.cached_scripts > 1000 {
        findings.push(
            " * Many cached scripts: more than 1000 scripts are cached. Parameterize \
             scripts instead of generating them, or flush the cache periodically."
                .to_string(),
        );
    }

    if findings.is_empty() {
        "No memory issues detected in this instance.\n".to_string()
    } else {
        let mut out = String::from("Detected a few issues in this instance's memory profile:\n\n");
        for finding in findings {
            out.push_str(&finding);
            out.push_str("\n\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::stats::MemoryOverhead;

    fn base_overhead() -> MemoryOverhead {
        MemoryOverhead {
            total_allocated: 100 * MIB,
            startup_allocated: MIB,
            peak_allocated: 100 * MIB,
            resident_set: 100 * MIB,
            total_frag: 1.0,
            total_frag_bytes: 0,
            allocator_frag: 1.0,
            allocator_frag_bytes: 0,
            allocator_rss: 1.0,
            allocator_rss_bytes: 0,
            rss_extra: 1.0,
            rss_extra_bytes: 0,
            clients_normal: 0,
            clients_replicas: 0,
            repl_backlog: 0,
            aof_buffer: 0,
            lua_caches: 0,
            functions_caches: 0,
            dbs: Vec::new(),
            overhead_total: 0,
            dataset: 0,
            total_keys: 0,
            peak_perc: 100.0,
            dataset_perc: 0.0,
            bytes_per_key: 0,
        }
    }

    fn ctx() -> DoctorContext {
        DoctorContext {
            client_count: 1,
            replica_count: 0,
            cached_scripts: 0,
        }
    }

    #[test]
    fn test_healthy_instance_reports_clean() {
        assert!(report(&base_overhead(), &ctx()).contains("No memory issues"));
    }

    #[test]
    fn test_small_instance_short_circuits() {
        let mut overhead = base_overhead();
        overhead.total_allocated = MIB;
        assert!(report(&overhead, &ctx()).contains("very little memory"));
    }

    #[test]
    fn test_peak_threshold() {
        let mut overhead = base_overhead();
        overhead.peak_allocated = 200 * MIB;
        assert!(report(&overhead, &ctx()).contains("Peak memory"));
    }

    #[test]
    fn test_fragmentation_needs_both_ratio_and_bytes() {
        let mut overhead = base_overhead();
        overhead.total_frag = 1.5;
        overhead.total_frag_bytes = MIB as i64; // under the byte floor
        assert!(report(&overhead, &ctx()).contains("No memory issues"));
        overhead.total_frag_bytes = (50 * MIB) as i64;
        assert!(report(&overhead, &ctx()).contains("High total fragmentation"));
    }

    #[test]
    fn test_client_and_script_thresholds() {
        let mut overhead = base_overhead();
        overhead.clients_normal = MIB;
        let mut context = ctx();
        context.client_count = 2;
        assert!(report(&overhead, &context).contains("Big client buffers"));

        context.cached_scripts = 1001;
        assert!(report(&overhead, &context).contains("Many cached scripts"));
    }
}
