//! API-call classification
//!
//! Maps entry-point names to the category used for summarization. The table
//! is static: per-name behavior lives here, not in hand-written dispatch.

use serde::{Deserialize, Serialize};

use crate::types::records::ApiFamily;

/// Summarization category of an API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiCategory {
    /// Kernel/compute dispatch; eligible for counter sampling and occupancy
    KernelDispatch,
    /// Host/device or device/device data movement
    MemoryTransfer,
    /// Blocking waits, queue flushes, barriers
    Synchronization,
    /// Creation and release of contexts, queues, buffers, programs, kernels
    ResourceManagement,
    /// One-shot informational queries
    Query,
    /// Repeated status polling; eligible for collapsing
    Polling,
    Other,
}

impl ApiCategory {
    /// Short tag used in the trace file
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiCategory::KernelDispatch => "dispatch",
            ApiCategory::MemoryTransfer => "transfer",
            ApiCategory::Synchronization => "sync",
            ApiCategory::ResourceManagement => "resource",
            ApiCategory::Query => "query",
            ApiCategory::Polling => "polling",
            ApiCategory::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dispatch" => Some(ApiCategory::KernelDispatch),
            "transfer" => Some(ApiCategory::MemoryTransfer),
            "sync" => Some(ApiCategory::Synchronization),
            "resource" => Some(ApiCategory::ResourceManagement),
            "query" => Some(ApiCategory::Query),
            "polling" => Some(ApiCategory::Polling),
            "other" => Some(ApiCategory::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an entry point by name.
///
/// Unknown names classify as `Other`; a runtime exposing more entry points
/// than the known set must not break capture.
pub fn classify(family: ApiFamily, name: &str) -> ApiCategory {
    match family {
        ApiFamily::OpenCl => classify_ocl(name),
        ApiFamily::Hsa => classify_hsa(name),
    }
}

fn classify_ocl(name: &str) -> ApiCategory {
    match name {
        "clEnqueueNDRangeKernel" | "clEnqueueTask" | "clEnqueueNativeKernel" => {
            ApiCategory::KernelDispatch
        }

        "clEnqueueReadBuffer"
        | "clEnqueueWriteBuffer"
        | "clEnqueueCopyBuffer"
        | "clEnqueueReadBufferRect"
        | "clEnqueueWriteBufferRect"
        | "clEnqueueCopyBufferRect"
        | "clEnqueueReadImage"
        | "clEnqueueWriteImage"
        | "clEnqueueCopyImage"
        | "clEnqueueCopyImageToBuffer"
        | "clEnqueueCopyBufferToImage"
        | "clEnqueueMapBuffer"
        | "clEnqueueMapImage"
        | "clEnqueueUnmapMemObject"
        | "clEnqueueFillBuffer"
        | "clEnqueueFillImage"
        | "clEnqueueMigrateMemObjects" => ApiCategory::MemoryTransfer,

        "clFinish" | "clFlush" | "clWaitForEvents" | "clEnqueueBarrier"
        | "clEnqueueBarrierWithWaitList" | "clEnqueueMarker"
        | "clEnqueueMarkerWithWaitList" | "clEnqueueWaitForEvents" => {
            ApiCategory::Synchronization
        }

        "clCreateContext"
        | "clCreateContextFromType"
        | "clCreateCommandQueue"
        | "clCreateCommandQueueWithProperties"
        | "clCreateBuffer"
        | "clCreateSubBuffer"
        | "clCreateImage"
        | "clCreateImage2D"
        | "clCreateImage3D"
        | "clCreateSampler"
        | "clCreateProgramWithSource"
        | "clCreateProgramWithBinary"
        | "clBuildProgram"
        | "clCreateKernel"
        | "clCreateKernelsInProgram"
        | "clCreateUserEvent"
        | "clRetainContext"
        | "clRetainCommandQueue"
        | "clRetainMemObject"
        | "clRetainProgram"
        | "clRetainKernel"
        | "clRetainEvent"
        | "clReleaseContext"
        | "clReleaseCommandQueue"
        | "clReleaseMemObject"
        | "clReleaseSampler"
        | "clReleaseProgram"
        | "clReleaseKernel"
        | "clReleaseEvent" => ApiCategory::ResourceManagement,

        "clGetPlatformIDs" | "clGetPlatformInfo" | "clGetDeviceIDs"
        | "clGetDeviceInfo" | "clGetContextInfo" | "clGetCommandQueueInfo"
        | "clGetMemObjectInfo" | "clGetImageInfo" | "clGetProgramInfo"
        | "clGetProgramBuildInfo" | "clGetKernelInfo"
        | "clGetKernelWorkGroupInfo" | "clGetEventProfilingInfo"
        | "clGetSupportedImageFormats" => ApiCategory::Query,

        "clGetEventInfo" => ApiCategory::Polling,

        "clSetKernelArg" | "clSetEventCallback" | "clSetUserEventStatus" => {
            ApiCategory::Other
        }

        _ => ApiCategory::Other,
    }
}

fn classify_hsa(name: &str) -> ApiCategory {
    match name {
        // HSA has no dispatch entry point; dispatches are submitted by
        // ringing a queue doorbell, so doorbell stores carry the category.
        "hsa_signal_store_relaxed" | "hsa_signal_store_screlease" => {
            ApiCategory::KernelDispatch
        }

        "hsa_memory_copy" | "hsa_amd_memory_async_copy"
        | "hsa_amd_memory_fill" | "hsa_amd_memory_lock"
        | "hsa_amd_memory_unlock" => ApiCategory::MemoryTransfer,

        "hsa_signal_wait_relaxed" | "hsa_signal_wait_scacquire"
        | "hsa_amd_signal_wait_any" | "hsa_queue_inactivate" => {
            ApiCategory::Synchronization
        }

        "hsa_init"
        | "hsa_shut_down"
        | "hsa_queue_create"
        | "hsa_queue_destroy"
        | "hsa_signal_create"
        | "hsa_signal_destroy"
        | "hsa_memory_allocate"
        | "hsa_memory_free"
        | "hsa_amd_memory_pool_allocate"
        | "hsa_amd_memory_pool_free"
        | "hsa_executable_create"
        | "hsa_executable_create_alt"
        | "hsa_executable_destroy"
        | "hsa_executable_freeze"
        | "hsa_executable_load_code_object"
        | "hsa_code_object_deserialize"
        | "hsa_code_object_destroy" => ApiCategory::ResourceManagement,

        "hsa_agent_get_info" | "hsa_system_get_info"
        | "hsa_executable_get_symbol" | "hsa_executable_symbol_get_info"
        | "hsa_amd_agent_iterate_memory_pools"
        | "hsa_iterate_agents" => ApiCategory::Query,

        "hsa_signal_load_relaxed" | "hsa_signal_load_scacquire"
        | "hsa_queue_load_read_index_relaxed"
        | "hsa_queue_load_read_index_scacquire" => ApiCategory::Polling,

        _ => ApiCategory::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_classification() {
        assert_eq!(
            classify(ApiFamily::OpenCl, "clEnqueueNDRangeKernel"),
            ApiCategory::KernelDispatch
        );
        assert_eq!(
            classify(ApiFamily::Hsa, "hsa_signal_store_screlease"),
            ApiCategory::KernelDispatch
        );
    }

    #[test]
    fn test_unknown_names_are_other() {
        assert_eq!(classify(ApiFamily::OpenCl, "clFrobnicate"), ApiCategory::Other);
        assert_eq!(classify(ApiFamily::Hsa, "hsa_frobnicate"), ApiCategory::Other);
    }

    #[test]
    fn test_category_tags_roundtrip() {
        for cat in [
            ApiCategory::KernelDispatch,
            ApiCategory::MemoryTransfer,
            ApiCategory::Synchronization,
            ApiCategory::ResourceManagement,
            ApiCategory::Query,
            ApiCategory::Polling,
            ApiCategory::Other,
        ] {
            assert_eq!(ApiCategory::from_str(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn test_polling_is_collapsible_category() {
        assert_eq!(classify(ApiFamily::OpenCl, "clGetEventInfo"), ApiCategory::Polling);
        assert_eq!(
            classify(ApiFamily::Hsa, "hsa_signal_load_relaxed"),
            ApiCategory::Polling
        );
    }
}
