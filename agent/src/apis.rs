//! Known entry-point descriptors
//!
//! One static table per API family: entry-point name, parameter layout used
//! for argument snapshots, and whether the call submits a kernel dispatch.
//! A runtime exposing entry points outside these tables is passed through
//! unwrapped; a runtime missing some of them is wrapped partially.

use sightline_shared::types::records::ApiFamily;

/// Descriptor of one known entry point
#[derive(Debug, Clone, Copy)]
pub struct EntryPointDesc {
    pub name: &'static str,

    /// Parameter names, in call order, used to label the argument snapshot
    pub params: &'static [&'static str],

    /// True when completing this call corresponds to a kernel dispatch
    /// eligible for counter sampling and occupancy capture
    pub is_dispatch: bool,
}

/// All entry points the agent knows how to wrap for a family
pub fn known_entry_points(family: ApiFamily) -> &'static [EntryPointDesc] {
    match family {
        ApiFamily::OpenCl => OCL_ENTRY_POINTS,
        ApiFamily::Hsa => HSA_ENTRY_POINTS,
    }
}

/// Look up the descriptor for a name
pub fn find_descriptor(family: ApiFamily, name: &str) -> Option<&'static EntryPointDesc> {
    known_entry_points(family).iter().find(|d| d.name == name)
}

/// The queue-flush entry used when `flush_before_sample` is enabled.
///
/// HSA has no global flush; counter backends for that family are expected
/// to wait on the completion signal themselves.
pub fn sync_entry_point(family: ApiFamily) -> Option<&'static str> {
    match family {
        ApiFamily::OpenCl => Some("clFinish"),
        ApiFamily::Hsa => None,
    }
}

/// Snapshot parameter name whose value carries the kernel identity of a
/// dispatch call
pub const KERNEL_PARAM: &str = "kernel";

/// Snapshot parameter name whose value carries the dispatch work-group size
pub const WORK_GROUP_PARAM: &str = "local_work_size";

const OCL_ENTRY_POINTS: &[EntryPointDesc] = &[
    EntryPointDesc {
        name: "clGetPlatformIDs",
        params: &["num_entries", "platforms", "num_platforms"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clGetDeviceIDs",
        params: &["platform", "device_type", "num_entries", "devices", "num_devices"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clGetDeviceInfo",
        params: &["device", "param_name", "param_value_size", "param_value"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clCreateContext",
        params: &["properties", "num_devices", "devices"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clCreateCommandQueue",
        params: &["context", "device", "properties"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clCreateBuffer",
        params: &["context", "flags", "size", "host_ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clCreateProgramWithSource",
        params: &["context", "count", "strings", "lengths"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clBuildProgram",
        params: &["program", "num_devices", "device_list", "options"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clCreateKernel",
        params: &["program", "kernel_name"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clSetKernelArg",
        params: &["kernel", "arg_index", "arg_size", "arg_value"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clEnqueueNDRangeKernel",
        params: &[
            "command_queue",
            "kernel",
            "work_dim",
            "global_work_size",
            "local_work_size",
        ],
        is_dispatch: true,
    },
    EntryPointDesc {
        name: "clEnqueueTask",
        params: &["command_queue", "kernel"],
        is_dispatch: true,
    },
    EntryPointDesc {
        name: "clEnqueueReadBuffer",
        params: &["command_queue", "buffer", "blocking_read", "offset", "size", "ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clEnqueueWriteBuffer",
        params: &["command_queue", "buffer", "blocking_write", "offset", "size", "ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clEnqueueCopyBuffer",
        params: &["command_queue", "src_buffer", "dst_buffer", "src_offset", "dst_offset", "size"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clEnqueueMapBuffer",
        params: &["command_queue", "buffer", "blocking_map", "map_flags", "offset", "size"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clEnqueueUnmapMemObject",
        params: &["command_queue", "memobj", "mapped_ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clFlush",
        params: &["command_queue"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clFinish",
        params: &["command_queue"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clWaitForEvents",
        params: &["num_events", "event_list"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clGetEventInfo",
        params: &["event", "param_name", "param_value_size", "param_value"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clGetEventProfilingInfo",
        params: &["event", "param_name", "param_value_size", "param_value"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clReleaseMemObject",
        params: &["memobj"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clReleaseKernel",
        params: &["kernel"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clReleaseProgram",
        params: &["program"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clReleaseCommandQueue",
        params: &["command_queue"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "clReleaseContext",
        params: &["context"],
        is_dispatch: false,
    },
];

const HSA_ENTRY_POINTS: &[EntryPointDesc] = &[
    EntryPointDesc {
        name: "hsa_init",
        params: &[],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_shut_down",
        params: &[],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_iterate_agents",
        params: &["callback", "data"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_agent_get_info",
        params: &["agent", "attribute", "value"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_queue_create",
        params: &["agent", "size", "type", "callback", "data"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_queue_destroy",
        params: &["queue"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_signal_create",
        params: &["initial_value", "num_consumers", "consumers"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_signal_destroy",
        params: &["signal"],
        is_dispatch: false,
    },
    // Doorbell stores submit previously queued AQL packets; they carry the
    // dispatch classification for this family.
    EntryPointDesc {
        name: "hsa_signal_store_relaxed",
        params: &["signal", "value", "kernel", "local_work_size"],
        is_dispatch: true,
    },
    EntryPointDesc {
        name: "hsa_signal_store_screlease",
        params: &["signal", "value", "kernel", "local_work_size"],
        is_dispatch: true,
    },
    EntryPointDesc {
        name: "hsa_signal_load_relaxed",
        params: &["signal"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_signal_wait_scacquire",
        params: &["signal", "condition", "compare_value", "timeout_hint", "wait_state_hint"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_memory_allocate",
        params: &["region", "size", "ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_memory_free",
        params: &["ptr"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_memory_copy",
        params: &["dst", "src", "size"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_executable_create_alt",
        params: &["profile", "default_float_rounding_mode", "options", "executable"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_executable_freeze",
        params: &["executable", "options"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_executable_get_symbol",
        params: &["executable", "module_name", "symbol_name", "agent", "call_convention"],
        is_dispatch: false,
    },
    EntryPointDesc {
        name: "hsa_code_object_deserialize",
        params: &["serialized_code_object", "size", "options", "code_object"],
        is_dispatch: false,
    },
];
